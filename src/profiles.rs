//! Fixed retrieval profiles: immutable presets so ranking behavior stays
//! auditable and reproducible until profile governance is expanded.

use crate::types::SearchMode;

/// A named bundle of retrieval weights, candidate counts, default mode and
/// per-source cap.
#[derive(Debug, Clone)]
pub struct FixedProfile {
    pub id: &'static str,
    pub default_mode: SearchMode,
    pub bm25_top_n: usize,
    pub semantic_top_n: usize,
    pub weight_bm25: f64,
    pub weight_cosine: f64,
    pub weight_freshness: f64,
    pub weight_metadata_boost: f64,
    pub per_source_cap: usize,
    pub prefer_notes_policy: bool,
}

pub const DEFAULT_PROFILE_ID: &str = "default_research";

const PROFILES: [FixedProfile; 3] = [
    FixedProfile {
        id: "default_research",
        default_mode: SearchMode::Hybrid,
        bm25_top_n: 120,
        semantic_top_n: 120,
        weight_bm25: 0.60,
        weight_cosine: 0.35,
        weight_freshness: 0.05,
        weight_metadata_boost: 0.00,
        per_source_cap: 3,
        prefer_notes_policy: false,
    },
    FixedProfile {
        id: "decisions_recent",
        default_mode: SearchMode::Hybrid,
        bm25_top_n: 150,
        semantic_top_n: 80,
        weight_bm25: 0.65,
        weight_cosine: 0.20,
        weight_freshness: 0.15,
        weight_metadata_boost: 0.10,
        per_source_cap: 4,
        prefer_notes_policy: true,
    },
    FixedProfile {
        id: "templates_lookup",
        default_mode: SearchMode::KeywordOnly,
        bm25_top_n: 200,
        semantic_top_n: 0,
        weight_bm25: 0.90,
        weight_cosine: 0.00,
        weight_freshness: 0.00,
        weight_metadata_boost: 0.10,
        per_source_cap: 5,
        prefer_notes_policy: false,
    },
];

/// All fixed profiles.
pub fn fixed_profiles() -> &'static [FixedProfile] {
    &PROFILES
}

fn lookup(id: &str) -> Option<&'static FixedProfile> {
    PROFILES.iter().find(|p| p.id == id)
}

/// Deterministic fallback order: requested profile, configured default,
/// then `default_research`. Unknown IDs never change behavior silently in
/// a data-dependent way.
pub fn resolve_profile(profile_id: &str, default_profile_id: &str) -> &'static FixedProfile {
    lookup(profile_id)
        .or_else(|| lookup(default_profile_id))
        .unwrap_or_else(|| lookup(DEFAULT_PROFILE_ID).expect("default profile exists"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_profile_resolves() {
        let p = resolve_profile("templates_lookup", DEFAULT_PROFILE_ID);
        assert_eq!(p.id, "templates_lookup");
        assert_eq!(p.default_mode, SearchMode::KeywordOnly);
        assert_eq!(p.per_source_cap, 5);
    }

    #[test]
    fn unknown_falls_back_to_default() {
        let p = resolve_profile("does_not_exist", "decisions_recent");
        assert_eq!(p.id, "decisions_recent");
    }

    #[test]
    fn unknown_default_falls_back_to_research() {
        let p = resolve_profile("nope", "also_nope");
        assert_eq!(p.id, "default_research");
        assert_eq!(p.bm25_top_n, 120);
    }

    #[test]
    fn weights_match_table() {
        let p = resolve_profile("decisions_recent", DEFAULT_PROFILE_ID);
        assert_eq!(p.weight_bm25, 0.65);
        assert_eq!(p.weight_cosine, 0.20);
        assert_eq!(p.weight_freshness, 0.15);
        assert_eq!(p.weight_metadata_boost, 0.10);
        assert!(p.prefer_notes_policy);
    }
}
