//! Profile-constrained ranking: policy filters, score normalization,
//! weighted fusion, risk downrank, per-source caps and evidence-pack
//! assembly. Deterministic for a fixed index version: score ties are broken
//! by source path, then chunk ordinal.

use std::collections::BTreeMap;
use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::index::{ProviderHit, ProviderSearchResult};
use crate::profiles::FixedProfile;
use crate::types::{
    parse_iso_date, ChunkRef, Coverage, EvidenceItemFull, EvidenceItemLlm, EvidencePackFull,
    EvidencePackLlm, IndexedChunk, SearchFilters, SearchMode, SearchResult, TimeSpan,
};

/// Reject filter combinations that would silently widen policy: requesting
/// restricted material requires the explicit opt-in flag.
pub fn validate_filters(filters: &SearchFilters) -> std::result::Result<(), String> {
    if !filters.allow_restricted
        && filters
            .confidentiality_allow
            .iter()
            .any(|c| c.eq_ignore_ascii_case("restricted"))
    {
        return Err("restricted cannot be requested when allow_restricted=false".to_string());
    }
    Ok(())
}

pub fn passes_filters(chunk: &IndexedChunk, filters: &SearchFilters) -> bool {
    if !filters.allow_restricted && chunk.confidentiality.eq_ignore_ascii_case("restricted") {
        return false;
    }

    if !filters.confidentiality_allow.is_empty()
        && !filters
            .confidentiality_allow
            .iter()
            .any(|c| c.trim().eq_ignore_ascii_case(&chunk.confidentiality))
    {
        return false;
    }

    if !filters.doc_type.is_empty()
        && !filters
            .doc_type
            .iter()
            .any(|d| d.trim().eq_ignore_ascii_case(&chunk.doc_type))
    {
        return false;
    }

    if !filters.project.is_empty()
        && !filters
            .project
            .iter()
            .any(|p| p.trim().eq_ignore_ascii_case(&chunk.project))
    {
        return false;
    }

    if !filters.tags.is_empty() {
        if filters.tag_mode.eq_ignore_ascii_case("all") {
            if !filters.tags.iter().all(|t| contains_tag(&chunk.tags, t)) {
                return false;
            }
        } else if !filters.tags.iter().any(|t| contains_tag(&chunk.tags, t)) {
            return false;
        }
    }

    if !filters.date_from.is_empty() || !filters.date_to.is_empty() {
        let Some(t) = parse_iso_date(&chunk.date) else {
            return false;
        };
        if !filters.date_from.is_empty() {
            if let Some(from) = parse_iso_date(&filters.date_from) {
                if t < from {
                    return false;
                }
            }
        }
        if !filters.date_to.is_empty() {
            if let Some(to) = parse_iso_date(&filters.date_to) {
                if t > to {
                    return false;
                }
            }
        }
    }

    true
}

fn contains_tag(tags: &[String], value: &str) -> bool {
    let value = value.trim().to_lowercase();
    tags.iter().any(|t| t.trim().to_lowercase() == value)
}

/// Exponential decay relative to the freshness reference time (365-day
/// half-life). Pinning the reference to index build time keeps scores
/// reproducible within an index version.
pub fn freshness_norm(date: &str, ref_time: DateTime<Utc>) -> f64 {
    let Some(t) = parse_iso_date(date) else {
        return 0.0;
    };
    let age_days = ((ref_time - t).num_seconds() as f64 / 86_400.0).max(0.0);
    const HALF_LIFE_DAYS: f64 = 365.0;
    (-std::f64::consts::LN_2 * age_days / HALF_LIFE_DAYS).exp()
}

pub fn metadata_boost(profile: &FixedProfile, chunk: &IndexedChunk) -> f64 {
    let mut boost = 0.0;
    if profile.prefer_notes_policy && (chunk.doc_type == "note" || chunk.doc_type == "policy") {
        boost += 1.0;
    }
    if profile.id == "templates_lookup" && chunk.doc_type == "template" {
        boost += 1.0;
    }
    boost
}

struct Candidate {
    chunk: IndexedChunk,
    raw_bm25: f64,
    raw_cosine: f64,
    raw_fused: f64,
    fresh_norm: f64,
    meta_boost: f64,
    score: f64,
    breakdown: crate::types::ScoreBreakdown,
}

/// Re-rank provider candidates into both evidence-pack views.
pub fn rank(
    query: &str,
    profile: &FixedProfile,
    mode: SearchMode,
    semantic_available: bool,
    top_k: usize,
    filters: &SearchFilters,
    provider_result: ProviderSearchResult,
    notes: Vec<String>,
) -> SearchResult {
    let ProviderSearchResult { index_info, hits } = provider_result;

    // Freshness reference pinned to index build time; wall-clock only when
    // the stored build time is unparseable.
    let ref_time = parse_iso_date(&index_info.built_at).unwrap_or_else(Utc::now);

    let mut cands: Vec<Candidate> = Vec::with_capacity(128);
    for ProviderHit {
        chunk,
        lexical_score,
        semantic_score,
        fused_score,
    } in hits
    {
        if !passes_filters(&chunk, filters) {
            continue;
        }
        if lexical_score <= 0.0 && semantic_score <= 0.0 && fused_score <= 0.0 {
            continue;
        }
        let fresh = freshness_norm(&chunk.date, ref_time);
        let boost = metadata_boost(profile, &chunk);
        cands.push(Candidate {
            chunk,
            raw_bm25: lexical_score,
            raw_cosine: semantic_score,
            raw_fused: fused_score,
            fresh_norm: fresh,
            meta_boost: boost,
            score: 0.0,
            breakdown: Default::default(),
        });
    }

    if cands.is_empty() {
        let mut empty_notes = notes;
        empty_notes.push("insufficient evidence".to_string());
        let full = EvidencePackFull {
            query: query.to_string(),
            profile_id: profile.id.to_string(),
            index_info,
            items: Vec::new(),
            coverage: Coverage::default(),
            notes: empty_notes.clone(),
        };
        let llm = to_llm_compact(query, profile.id, &full.items, empty_notes);
        return SearchResult { full, llm };
    }

    // Candidates either carry a pre-fused score (e.g. RRF from a hybrid
    // backend) or separate lexical/semantic components.
    let has_fused = cands[0].raw_fused > 0.0;
    let primary = |c: &Candidate| if has_fused { c.raw_fused } else { c.raw_bm25 };

    cands.sort_by(|a, b| {
        primary(b)
            .partial_cmp(&primary(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.source_path.cmp(&b.chunk.source_path))
            .then_with(|| a.chunk.chunk_ordinal.cmp(&b.chunk.chunk_ordinal))
    });

    let top_n = if profile.bm25_top_n == 0 {
        cands.len()
    } else {
        profile.bm25_top_n.min(cands.len())
    };
    cands.truncate(top_n);

    let (mut min_bm, mut max_bm) = (cands[0].raw_bm25, cands[0].raw_bm25);
    let (mut min_cos, mut max_cos) = (cands[0].raw_cosine, cands[0].raw_cosine);
    let (mut min_fused, mut max_fused) = (cands[0].raw_fused, cands[0].raw_fused);
    for c in &cands {
        min_bm = min_bm.min(c.raw_bm25);
        max_bm = max_bm.max(c.raw_bm25);
        min_cos = min_cos.min(c.raw_cosine);
        max_cos = max_cos.max(c.raw_cosine);
        min_fused = min_fused.min(c.raw_fused);
        max_fused = max_fused.max(c.raw_fused);
    }

    for c in &mut cands {
        let (bm_norm, cos_norm) = if has_fused {
            // The backend already fused lexical+semantic. Spread the fused
            // signal across both weights so profile math still applies.
            let fused_norm = if max_fused > min_fused {
                (c.raw_fused - min_fused) / (max_fused - min_fused)
            } else {
                1.0
            };
            (fused_norm, fused_norm)
        } else {
            let mut bm_norm = if max_bm > min_bm {
                (c.raw_bm25 - min_bm) / (max_bm - min_bm)
            } else {
                1.0
            };
            let mut cos_norm = 0.0;
            if semantic_available && mode != SearchMode::KeywordOnly {
                cos_norm = if max_cos > min_cos {
                    (c.raw_cosine - min_cos) / (max_cos - min_cos)
                } else {
                    1.0
                };
            }
            if mode == SearchMode::SemanticOnly {
                bm_norm = 0.0;
            }
            if mode == SearchMode::KeywordOnly {
                cos_norm = 0.0;
            }
            (bm_norm, cos_norm)
        };

        let mut final_score = profile.weight_bm25 * bm_norm
            + profile.weight_cosine * cos_norm
            + profile.weight_freshness * c.fresh_norm
            + profile.weight_metadata_boost * c.meta_boost;
        final_score = final_score.max(0.0);
        let penalty = (1.0 - 0.2 * c.chunk.risk_score).max(0.5);
        final_score *= penalty;

        c.score = final_score;
        c.breakdown = crate::types::ScoreBreakdown {
            bm25_norm: bm_norm,
            cosine_norm: cos_norm,
            freshness_norm: c.fresh_norm,
            metadata_boost: c.meta_boost,
            final_score,
        };
    }

    cands.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.source_path.cmp(&b.chunk.source_path))
            .then_with(|| a.chunk.chunk_ordinal.cmp(&b.chunk.chunk_ordinal))
    });

    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut items: Vec<EvidenceItemFull> = Vec::with_capacity(top_k);
    for c in &cands {
        if items.len() >= top_k {
            break;
        }
        let used = per_source.entry(c.chunk.source_path.clone()).or_insert(0);
        if *used >= profile.per_source_cap {
            continue;
        }
        *used += 1;
        items.push(EvidenceItemFull {
            source_path: c.chunk.source_path.clone(),
            chunk_ref: ChunkRef {
                source_path: c.chunk.source_path.clone(),
                chunk_ordinal: c.chunk.chunk_ordinal,
            },
            chunk_loc: c.chunk.chunk_loc.clone(),
            document_version: c.chunk.document_version.clone(),
            title: c.chunk.title.clone(),
            date: c.chunk.date.clone(),
            snippet: c.chunk.snippet.clone(),
            score: c.score,
            score_breakdown: c.breakdown.clone(),
            flags: c.chunk.flags.clone(),
        });
    }

    let coverage = build_coverage(&items);
    let llm = to_llm_compact(query, profile.id, &items, notes.clone());
    let full = EvidencePackFull {
        query: query.to_string(),
        profile_id: profile.id.to_string(),
        index_info,
        items,
        coverage,
        notes,
    };
    SearchResult { full, llm }
}

fn build_coverage(items: &[EvidenceItemFull]) -> Coverage {
    if items.is_empty() {
        return Coverage::default();
    }
    let mut sources = std::collections::HashSet::new();
    let mut min_t: Option<DateTime<Utc>> = None;
    let mut max_t: Option<DateTime<Utc>> = None;
    for item in items {
        sources.insert(item.source_path.as_str());
        if let Some(t) = parse_iso_date(&item.date) {
            min_t = Some(min_t.map_or(t, |m| m.min(t)));
            max_t = Some(max_t.map_or(t, |m| m.max(t)));
        }
    }
    let time_span = match (min_t, max_t) {
        (Some(from), Some(to)) => Some(TimeSpan {
            from: from.format("%Y-%m-%d").to_string(),
            to: to.format("%Y-%m-%d").to_string(),
        }),
        _ => None,
    };
    Coverage {
        unique_sources: sources.len(),
        time_span,
    }
}

/// Compact view: source paths replaced with first-seen aliases so the tool
/// payload stays small and stable.
fn to_llm_compact(
    query: &str,
    profile_id: &str,
    items: &[EvidenceItemFull],
    notes: Vec<String>,
) -> EvidencePackLlm {
    let mut alias_by_source: HashMap<&str, String> = HashMap::new();
    let mut sources: BTreeMap<String, String> = BTreeMap::new();
    let mut alias_seq = 1usize;
    let mut llm_items = Vec::with_capacity(items.len());

    for item in items {
        let alias = alias_by_source
            .entry(item.source_path.as_str())
            .or_insert_with(|| {
                let alias = format!("S{alias_seq}");
                alias_seq += 1;
                sources.insert(alias.clone(), item.source_path.clone());
                alias
            })
            .clone();
        llm_items.push(EvidenceItemLlm {
            chunk_ref: format!("{alias}#{}", item.chunk_ref.chunk_ordinal),
            snippet: item.snippet.clone(),
            score: item.score,
        });
    }

    EvidencePackLlm {
        query: query.to_string(),
        profile_id: profile_id.to_string(),
        sources,
        items: llm_items,
        notes,
    }
}
