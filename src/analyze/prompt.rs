//! Prompt compiler: signals + velocity + optional knowledge → one bounded
//! instruction text for the synthesis step.
//!
//! The synthesis step never sees raw signal lists. Signals are grouped by
//! source, then by primary tag, and reduced to counts, mean weights and the
//! three most frequent secondary tags. Titles, bodies and URLs are dropped.
//!
//! Template choice is a pure predicate over the active trust tiers: any
//! non-raw source switches to [`PromptTemplate::Counsel`], a raw-only batch
//! gets [`PromptTemplate::Generic`].

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::ingest::types::Signal;
use crate::insight::{InsightKind, SUMMARY_MAX_CHARS};
use crate::trust::{SourceDescriptor, TrustTable, TrustTier};
use crate::velocity::{fading_topics, VelocityScore};

pub const TOP_SECONDARY_TAGS: usize = 3;
pub const DIGEST_MAX_CHARS: usize = 16_000;
pub const KNOWLEDGE_MAX_CHARS: usize = 8_000;
pub const ROSTER_MAX_CHARS: usize = 4_000;
pub const HOT_TOPICS_MAX_CHARS: usize = 3_000;
pub const FADING_TOPICS_MAX_CHARS: usize = 2_000;
pub const FOCUS_MAX_CHARS: usize = 200;

/// The anti-noise filter, only ever emitted in counsel mode.
pub const ANTI_NOISE_FILTER: &str = "\
## Anti-noise filter
Kill anything an expert reader already knows. Drop launches restated by many \
outlets, generic \"AI is growing\" observations, benchmark leaderboard churn, \
and anything whose only support is how often it was posted.";

/// Priority rule, stated verbatim in counsel mode.
pub const PRIORITY_RULE: &str = "\
## Priority rule
Volume alone never implies top priority. Convergence across 3+ distinct trust \
tiers on a non-obvious topic is the qualifying bar for p0. Absence, reversal \
and cross-domain findings must still cite the sources they rest on. p0 claims \
below the bar are downgraded after review.";

const REWARD_CATEGORIES: &str = "\
## What earns a place
1. Absence: something that should appear in these signals and does not.
   Good: \"Three vendors shipped agent SDKs this week; none of them mention sandboxing.\"
   Bad: \"Nobody is discussing quantum computing.\" (it was never expected here)
2. Reversal: a source or community moving against its own recent position.
   Good: \"The crowd tier turned on tool X two weeks after championing it.\"
   Bad: \"Opinions on tool X are mixed.\"
3. Cross-domain surprise: an idea, tool or failure mode showing up where it does not belong.
   Good: \"Compiler researchers are reusing an agent benchmark as a fuzzing corpus.\"
   Bad: \"Many developers use LLMs for coding.\"";

/// Insight count and p0 cap requested from the synthesis step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputContract {
    pub min_insights: usize,
    pub max_insights: usize,
    pub max_p0: usize,
    pub max_per_area: usize,
}

impl OutputContract {
    pub const ANALYSIS: OutputContract = OutputContract {
        min_insights: 8,
        max_insights: 12,
        max_p0: 2,
        max_per_area: 2,
    };

    pub const RESEARCH: OutputContract = OutputContract {
        min_insights: 3,
        max_insights: 6,
        max_p0: 1,
        max_per_area: 3,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Counsel,
    Generic,
}

/// Strict template for batches with at least one curated source.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounselPrompt;

/// Plain analyst template for raw-only batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericPrompt;

#[derive(Debug, Clone, Copy)]
pub enum PromptTemplate {
    Counsel(CounselPrompt),
    Generic(GenericPrompt),
}

impl PromptTemplate {
    /// Counsel as soon as one active tier is not `raw`.
    pub fn select(active_tiers: &BTreeSet<TrustTier>) -> Self {
        if active_tiers.iter().any(|t| !t.is_raw()) {
            PromptTemplate::Counsel(CounselPrompt)
        } else {
            PromptTemplate::Generic(GenericPrompt)
        }
    }

    pub fn kind(&self) -> TemplateKind {
        match self {
            PromptTemplate::Counsel(_) => TemplateKind::Counsel,
            PromptTemplate::Generic(_) => TemplateKind::Generic,
        }
    }

    fn preamble(&self, digests: &[SourceDigest]) -> String {
        match self {
            PromptTemplate::Counsel(p) => p.preamble(digests),
            PromptTemplate::Generic(p) => p.preamble(digests),
        }
    }
}

impl CounselPrompt {
    fn preamble(&self, digests: &[SourceDigest]) -> String {
        let mut out = String::from(
            "You are a research counsel briefing a reader who already follows this field \
             closely. Their attention is the scarce resource: say less, and make every line \
             something they could not have guessed.\n\n",
        );
        out.push_str(ANTI_NOISE_FILTER);
        out.push_str("\n\n");
        out.push_str(REWARD_CATEGORIES);
        out.push_str("\n\n");
        out.push_str(PRIORITY_RULE);
        out.push_str("\n\n## Source roster\n");
        out.push_str("Each source has a trust tier and a known editorial angle. Weigh them accordingly.\n");
        let roster = digests.iter().map(|d| {
            let mut line = format!("- {} (`{}`, {})", d.descriptor.display_name, d.source, d.tier);
            if !d.descriptor.angle.is_empty() {
                let _ = write!(line, ": {}", d.descriptor.angle);
            }
            line.push('\n');
            line
        });
        push_capped(&mut out, roster, ROSTER_MAX_CHARS, "sources");
        out
    }
}

impl GenericPrompt {
    fn preamble(&self, digests: &[SourceDigest]) -> String {
        let mut out = String::from(
            "You are an analyst summarizing what a batch of community signals says. Identify \
             trends, points of consensus, disagreements and notable tools. Be specific: name the \
             tool, project or claim, never just the category.\n\n## Sources\n",
        );
        let roster = digests.iter().map(|d| format!("- `{}`\n", d.source));
        push_capped(&mut out, roster, ROSTER_MAX_CHARS, "sources");
        out
    }
}

/// Secondary tag statistics inside one primary-tag group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagStat {
    pub tag: String,
    pub count: usize,
    pub mean_weight: f64,
}

/// All signals of one source sharing a primary tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagGroup {
    pub primary: String,
    pub count: usize,
    pub mean_weight: f64,
    pub secondary: Vec<TagStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDigest {
    pub source: String,
    pub tier: TrustTier,
    pub descriptor: SourceDescriptor,
    pub signal_count: usize,
    pub groups: Vec<TagGroup>,
}

/// Lossy aggregation of a signal batch. Deterministic for a given input set.
pub fn digest(signals: &[Signal], trust: &TrustTable) -> Vec<SourceDigest> {
    let mut by_source: BTreeMap<&str, BTreeMap<&str, Vec<&Signal>>> = BTreeMap::new();
    for s in signals {
        by_source
            .entry(s.source.as_str())
            .or_default()
            .entry(s.primary_tag())
            .or_default()
            .push(s);
    }

    let mut out: Vec<SourceDigest> = by_source
        .into_iter()
        .map(|(source, groups)| {
            let mut groups: Vec<TagGroup> = groups
                .into_iter()
                .map(|(primary, members)| tag_group(primary, &members))
                .collect();
            groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.primary.cmp(&b.primary)));
            SourceDigest {
                source: source.to_string(),
                tier: trust.tier_of(source),
                descriptor: trust.descriptor_of(source),
                signal_count: groups.iter().map(|g| g.count).sum(),
                groups,
            }
        })
        .collect();

    out.sort_by(|a, b| a.tier.cmp(&b.tier).then_with(|| a.source.cmp(&b.source)));
    out
}

fn tag_group(primary: &str, members: &[&Signal]) -> TagGroup {
    let mut secondary: BTreeMap<&str, (usize, u64)> = BTreeMap::new();
    for s in members {
        for t in s.tags.iter().skip(1) {
            let e = secondary.entry(t.as_str()).or_insert((0, 0));
            e.0 += 1;
            e.1 = e.1.saturating_add(s.weight);
        }
    }
    let mut stats: Vec<TagStat> = secondary
        .into_iter()
        .map(|(tag, (count, total))| TagStat {
            tag: tag.to_string(),
            count,
            mean_weight: mean(total, count),
        })
        .collect();
    stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    stats.truncate(TOP_SECONDARY_TAGS);

    let total: u64 = members.iter().fold(0u64, |acc, s| acc.saturating_add(s.weight));
    TagGroup {
        primary: primary.to_string(),
        count: members.len(),
        mean_weight: mean(total, members.len()),
        secondary: stats,
    }
}

fn mean(total: u64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// Compiled text plus what selected it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledPrompt {
    pub template: TemplateKind,
    pub active_tiers: BTreeSet<TrustTier>,
    pub text: String,
}

/// Borrowing compiler. Holds the trust table for the whole run.
#[derive(Debug, Clone, Copy)]
pub struct PromptCompiler<'a> {
    trust: &'a TrustTable,
}

impl<'a> PromptCompiler<'a> {
    pub fn new(trust: &'a TrustTable) -> Self {
        Self { trust }
    }

    pub fn compile(
        &self,
        signals: &[Signal],
        scores: &[VelocityScore],
        knowledge: Option<&str>,
    ) -> CompiledPrompt {
        self.build(signals, scores, knowledge, None, OutputContract::ANALYSIS)
    }

    /// Same compression and templates, plus a focus section and a smaller contract.
    pub fn compile_research(
        &self,
        signals: &[Signal],
        scores: &[VelocityScore],
        knowledge: Option<&str>,
        focus: &str,
    ) -> CompiledPrompt {
        self.build(signals, scores, knowledge, Some(focus), OutputContract::RESEARCH)
    }

    fn build(
        &self,
        signals: &[Signal],
        scores: &[VelocityScore],
        knowledge: Option<&str>,
        focus: Option<&str>,
        contract: OutputContract,
    ) -> CompiledPrompt {
        let digests = digest(signals, self.trust);
        let active_tiers: BTreeSet<TrustTier> = digests.iter().map(|d| d.tier).collect();
        let template = PromptTemplate::select(&active_tiers);

        let mut text = template.preamble(&digests);
        text.push('\n');

        let tier_names: Vec<&str> = active_tiers.iter().map(|t| t.as_str()).collect();
        let _ = writeln!(text, "Active trust tiers: {}\n", join_or_none(&tier_names));

        if let Some(f) = focus.map(str::trim).filter(|f| !f.is_empty()) {
            let f: String = f.chars().take(FOCUS_MAX_CHARS).collect();
            let _ = write!(
                text,
                "## Research focus\nConcentrate on \"{f}\". Report what the signals say about it, \
                 including what is conspicuously missing.\n\n"
            );
        }

        text.push_str(&render_digest(&digests));
        text.push_str(&render_hot_topics(scores));
        text.push_str(&render_fading(scores));
        if let Some(k) = knowledge {
            text.push_str(&render_knowledge(k));
        }
        text.push_str(&render_contract(contract));

        tracing::debug!(
            template = ?template.kind(),
            sources = digests.len(),
            chars = text.len(),
            "prompt compiled"
        );
        CompiledPrompt {
            template: template.kind(),
            active_tiers,
            text,
        }
    }
}

/// Convenience wrapper around [`PromptCompiler::compile`].
pub fn compile(
    signals: &[Signal],
    scores: &[VelocityScore],
    knowledge: Option<&str>,
    trust: &TrustTable,
) -> CompiledPrompt {
    PromptCompiler::new(trust).compile(signals, scores, knowledge)
}

fn render_digest(digests: &[SourceDigest]) -> String {
    let mut out = String::from(
        "## Signal digest\nSignals are grouped by source, then by primary tag. Only counts and \
         mean weights are shown; individual items are withheld.\n",
    );
    if digests.is_empty() {
        out.push_str("(no signals in this batch)\n\n");
        return out;
    }

    let budget_start = out.len();
    let total_groups: usize = digests.iter().map(|d| d.groups.len()).sum();
    let mut emitted = 0usize;

    'sources: for d in digests {
        let header = format!(
            "\n### {} (`{}`, {}): {} signals\n",
            d.descriptor.display_name, d.source, d.tier, d.signal_count
        );
        if out.len() - budget_start + header.len() > DIGEST_MAX_CHARS {
            break;
        }
        out.push_str(&header);
        for g in &d.groups {
            let line = group_line(g);
            if out.len() - budget_start + line.len() > DIGEST_MAX_CHARS {
                break 'sources;
            }
            out.push_str(&line);
            emitted += 1;
        }
    }

    if emitted < total_groups {
        let _ = writeln!(out, "- ... {} further groups omitted", total_groups - emitted);
    }
    out.push('\n');
    out
}

fn group_line(g: &TagGroup) -> String {
    let mut line = format!(
        "- {}: {} signals, mean weight {:.1}",
        g.primary, g.count, g.mean_weight
    );
    if !g.secondary.is_empty() {
        let related: Vec<String> = g
            .secondary
            .iter()
            .map(|t| format!("{} ({}, w {:.1})", t.tag, t.count, t.mean_weight))
            .collect();
        let _ = write!(line, "; related: {}", related.join(", "));
    }
    line.push('\n');
    line
}

fn render_hot_topics(scores: &[VelocityScore]) -> String {
    let hot: Vec<&VelocityScore> = scores.iter().filter(|s| s.is_hot).collect();
    if hot.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Hot topics (velocity above 50% against the previous window)\n");
    let lines = hot.iter().map(|s| {
        format!(
            "- {}: {} now vs {} before ({:+.1}%)\n",
            s.topic, s.current_count, s.previous_count, s.velocity_pct
        )
    });
    push_capped(&mut out, lines, HOT_TOPICS_MAX_CHARS, "hot topics");
    out.push('\n');
    out
}

fn render_fading(scores: &[VelocityScore]) -> String {
    let fading = fading_topics(scores);
    if fading.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Vanished topics (present in the previous window, absent now)\n");
    let lines = fading
        .iter()
        .map(|s| format!("- {}: 0 now vs {} before\n", s.topic, s.previous_count));
    push_capped(&mut out, lines, FADING_TOPICS_MAX_CHARS, "vanished topics");
    out.push_str(
        "Treat these as candidate absence findings: explain why the silence matters, or ignore them.\n\n",
    );
    out
}

fn render_knowledge(k: &str) -> String {
    if k.trim().is_empty() {
        return String::new();
    }
    let mut out = String::from(
        "## Background knowledge (time-uncertain)\nThe notes below come from model memory or \
         earlier research and may be out of date. Cross-check every claim against the live \
         signals above before using it; never repeat it as established fact.\n\n",
    );
    if k.chars().count() > KNOWLEDGE_MAX_CHARS {
        out.extend(k.chars().take(KNOWLEDGE_MAX_CHARS));
        out.push_str("\n[truncated]");
    } else {
        out.push_str(k);
    }
    out.push_str("\n\n");
    out
}

fn render_contract(c: OutputContract) -> String {
    let kinds: Vec<String> = InsightKind::ALL
        .iter()
        .map(|k| format!("\"{}\"", k.as_str()))
        .collect();
    let tiers: Vec<&str> = TrustTier::ALL.iter().map(|t| t.as_str()).collect();

    let mut out = String::from("## Output format\n");
    out.push_str("Return ONLY a JSON array of objects. No prose before or after it.\n");
    out.push_str("Every object has exactly these fields:\n");
    let _ = writeln!(
        out,
        "- \"kind\": one of {} (\"gap\" marks an absence finding)",
        kinds.join(", ")
    );
    out.push_str(
        "- \"topic\": the specific subject (a named tool, claim or event), never a generic category\n",
    );
    let _ = writeln!(out, "- \"summary\": at most {SUMMARY_MAX_CHARS} characters");
    out.push_str("- \"confidence\": number from 0.0 to 1.0\n");
    out.push_str("- \"priority\": one of \"p0\", \"p1\", \"p2\"\n");
    out.push_str("- \"sources\": array of source ids exactly as written in backticks above\n");
    let _ = writeln!(
        out,
        "- \"convergence_tiers\": array of distinct trust tiers among {}",
        tiers.join(", ")
    );
    out.push_str("- \"pattern\": one of \"none\", \"absence\", \"reversal\", \"cross_domain\"\n");
    let _ = writeln!(
        out,
        "Return between {} and {} insights. Fewer is acceptable only when the signals cannot support more.",
        c.min_insights, c.max_insights
    );
    let _ = writeln!(
        out,
        "Merge near-duplicate topics into a single insight. At most {} insights per broad topic area.",
        c.max_per_area
    );
    let _ = writeln!(out, "At most {} insights may have priority \"p0\".", c.max_p0);
    out
}

/// Appends lines while they fit in `max_chars`. Whatever is left becomes a
/// single "N further ... omitted" line.
fn push_capped<I>(out: &mut String, lines: I, max_chars: usize, what: &str)
where
    I: ExactSizeIterator<Item = String>,
{
    let total = lines.len();
    let mut used = 0usize;
    let mut emitted = 0usize;
    for line in lines {
        if used + line.len() > max_chars {
            break;
        }
        used += line.len();
        out.push_str(&line);
        emitted += 1;
    }
    if emitted < total {
        let _ = writeln!(out, "- ... {} further {what} omitted", total - emitted);
    }
}

fn join_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}
