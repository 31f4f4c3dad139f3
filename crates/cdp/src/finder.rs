//! Chromium executable discovery.

use std::path::{Path, PathBuf};

/// Returns the first Chromium-family executable found on this machine.
pub(crate) fn find_chrome_executable() -> Option<PathBuf> {
	for candidate in platform_candidates() {
		if candidate.starts_with('/') || candidate.contains('\\') || candidate.contains(':') {
			if Path::new(&candidate).exists() {
				return Some(PathBuf::from(candidate));
			}
		} else if let Ok(path) = which::which(&candidate) {
			return Some(path);
		}
	}

	None
}

fn platform_candidates() -> Vec<String> {
	if cfg!(target_os = "macos") {
		[
			"/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
			"/Applications/Chromium.app/Contents/MacOS/Chromium",
			"/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
		]
		.into_iter()
		.map(str::to_string)
		.collect()
	} else if cfg!(target_os = "windows") {
		windows_candidates()
	} else {
		linux_candidates()
	}
}

pub(crate) fn linux_candidates() -> Vec<String> {
	[
		"chromium",
		"chromium-browser",
		"google-chrome-stable",
		"google-chrome",
		"headless_shell",
		"/usr/bin/chromium",
		"/usr/bin/chromium-browser",
		"/usr/bin/google-chrome-stable",
		"/usr/bin/google-chrome",
		"/snap/bin/chromium",
	]
	.into_iter()
	.map(str::to_string)
	.collect()
}

fn windows_candidates() -> Vec<String> {
	let mut roots = Vec::new();
	for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
		if let Ok(value) = std::env::var(key) {
			roots.push(PathBuf::from(value));
		}
	}
	if roots.is_empty() {
		roots.push(PathBuf::from(r"C:\Program Files"));
		roots.push(PathBuf::from(r"C:\Program Files (x86)"));
	}

	let suffixes: &[&[&str]] = &[
		&["Google", "Chrome", "Application", "chrome.exe"],
		&["Microsoft", "Edge", "Application", "msedge.exe"],
		&["Chromium", "Application", "chrome.exe"],
	];

	let mut candidates = Vec::new();
	for root in roots {
		for suffix in suffixes {
			let mut path = root.clone();
			for component in *suffix {
				path.push(component);
			}
			candidates.push(path.to_string_lossy().to_string());
		}
	}
	candidates.extend(["chrome.exe".to_string(), "msedge.exe".to_string()]);
	candidates
}
