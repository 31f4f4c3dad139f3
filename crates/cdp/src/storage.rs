//! Web storage snapshots read from a page.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{CdpError, Result};

/// Script evaluated in the page to dump both storage areas.
///
/// Access to either area can throw (opaque origins, disabled storage), in which
/// case that area is reported empty.
pub(crate) const STORAGE_DUMP_SCRIPT: &str = r#"(() => {
	const dump = (area) => {
		const out = {};
		try {
			const store = window[area];
			for (let i = 0; i < store.length; i++) {
				const key = store.key(i);
				out[key] = store.getItem(key);
			}
		} catch (_) {}
		return out;
	};
	return { local: dump("localStorage"), session: dump("sessionStorage") };
})()"#;

/// Key→value contents of `localStorage` and `sessionStorage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StorageSnapshot {
	#[serde(default)]
	pub local: BTreeMap<String, String>,
	#[serde(default)]
	pub session: BTreeMap<String, String>,
}

impl StorageSnapshot {
	pub fn is_empty(&self) -> bool {
		self.local.is_empty() && self.session.is_empty()
	}

	/// Total number of entries across both areas.
	pub fn len(&self) -> usize {
		self.local.len() + self.session.len()
	}

	/// Parses a `Runtime.evaluate` result produced by [`STORAGE_DUMP_SCRIPT`].
	pub(crate) fn from_evaluate_result(result: &Value) -> Result<Self> {
		if let Some(details) = result.get("exceptionDetails") {
			let text = details
				.pointer("/exception/description")
				.or_else(|| details.get("text"))
				.and_then(Value::as_str)
				.unwrap_or("unknown exception");
			return Err(CdpError::Payload(format!("storage dump threw: {}", text)));
		}

		let value = result
			.pointer("/result/value")
			.ok_or_else(|| CdpError::Payload("storage dump returned no value".into()))?;
		Ok(serde_json::from_value(value.clone())?)
	}
}
