//! Well-known Algorand Standard Assets traded by the agent.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetInfo {
    pub id: u64,
    pub name: &'static str,
    pub decimals: u32,
}

const KNOWN_ASSETS: &[AssetInfo] = &[
    AssetInfo { id: 0, name: "ALGO", decimals: 6 },
    AssetInfo { id: 31566704, name: "USDC", decimals: 6 },
    AssetInfo { id: 312769, name: "USDT", decimals: 6 },
    AssetInfo { id: 465865291, name: "STBL", decimals: 6 },
    AssetInfo { id: 287867876, name: "OPUL", decimals: 10 },
    AssetInfo { id: 27165954, name: "PLANET", decimals: 6 },
];

/// Name/id lookup over the known asset table.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry;

impl AssetRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn all(&self) -> &'static [AssetInfo] {
        KNOWN_ASSETS
    }

    /// Case-insensitive lookup; "Algorand" is an alias for ALGO.
    pub fn by_name(&self, name: &str) -> Option<&'static AssetInfo> {
        let name = normalize_name(name);
        KNOWN_ASSETS.iter().find(|a| a.name == name)
    }

    pub fn by_id(&self, id: u64) -> Option<&'static AssetInfo> {
        KNOWN_ASSETS.iter().find(|a| a.id == id)
    }

    /// Decimals for an asset id; unknown ASAs are assumed to use 6.
    pub fn decimals(&self, id: u64) -> u32 {
        self.by_id(id).map(|a| a.decimals).unwrap_or(6)
    }
}

/// Canonical upper-case asset name as used in pool names.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.eq_ignore_ascii_case("algorand") {
        "ALGO".to_string()
    } else {
        trimmed.to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups() {
        let reg = AssetRegistry::new();
        assert_eq!(reg.by_name("usdc").unwrap().id, 31566704);
        assert_eq!(reg.by_name("Algorand").unwrap().id, 0);
        assert_eq!(reg.by_id(287867876).unwrap().decimals, 10);
        assert!(reg.by_name("DOGE").is_none());
        assert_eq!(reg.decimals(999), 6);
    }
}
