//! Prompt builders for every stage.
//!
//! Plain string assembly; the JSON-only contracts are spelled out
//! explicitly because the parsing stages rely on them.

use chrono::Utc;

use crate::state::{Aspect, ReferenceMaterial, ResearchResult};

/// Banner block for caller-supplied research context.
pub fn research_context_block(context: Option<&str>, usage: &str) -> String {
    match context {
        Some(ctx) if !ctx.is_empty() => {
            let rule = "=".repeat(80);
            format!("\n{rule}\nRESEARCH CONTEXT\n{rule}\n{ctx}\n{rule}\n\nConsider this context when {usage}.\n")
        }
        _ => String::new(),
    }
}

/// Reference context block. `compressed` keeps only key points so the
/// planning prompt stays small.
pub fn reference_context_block(references: &[ReferenceMaterial], compressed: bool) -> String {
    if references.is_empty() {
        return String::new();
    }
    let mut block = String::from("\nREFERENCE MATERIALS PROVIDED BY THE USER:\n");
    for (i, reference) in references.iter().enumerate() {
        block.push_str(&format!("\n[REF-{}] {} ({})\n", i + 1, reference.title, reference.source));
        if compressed {
            for point in &reference.key_points {
                block.push_str(&format!("  - {point}\n"));
            }
        } else {
            block.push_str(&format!("{}\n", reference.summary));
        }
        if !reference.note.is_empty() {
            block.push_str(&format!("  Note: {}\n", reference.note));
        }
    }
    block.push_str("\nCite these materials as [REF-n] where relevant.\n");
    block
}

/// Exploration sub-agent prompt (topic analysis, at most ~3 tool calls).
pub fn exploration_prompt(topic: &str) -> String {
    format!(
        r#"Understand this research topic and gather basic background information: "{topic}"

Your task:
1. Identify 2-3 key concepts or terms from this topic
2. Search for general information on these concepts (use broader, well-known terms if specific searches fail)
3. After gathering enough context (2-3 searches maximum), summarize what you learned

IMPORTANT:
- Stop searching after 2-3 tool calls - don't try to find every possible detail
- If a search returns no results, try one broader search term and move on
- Provide a brief summary with the information you found, even if incomplete

Keep it simple - just understand the core research areas, not detailed analysis."#
    )
}

/// JSON-only dimension identification prompt.
pub fn dimensions_prompt(
    topic: &str,
    target_dimensions: usize,
    research_context: &str,
    reference_context: &str,
    search_context: &str,
) -> String {
    format!(
        r#"You are a research assistant analyzing a complex topic.

Your task: Identify the {target_dimensions} most important dimensions (major aspects/categories) to investigate for this topic.
{research_context}{reference_context}
For example:
- Topic: "Climate change impact on society"
  Dimensions: ["Environmental Impact", "Economic Consequences", "Social Effects"]

Topic to analyze:
{topic}
{search_context}
Return up to {target_dimensions} key dimensions that would provide comprehensive coverage of this topic.
Each dimension should be a distinct aspect that can be researched independently.

IMPORTANT:
- Return at most {target_dimensions} dimensions. If you return more, extras will be automatically discarded.
- You MUST respond in JSON format with the following structure:
{{"dimensions": ["Dimension 1", "Dimension 2"]}}"#
    )
}

/// Aspect analysis system prompt with the JSON-only contract appended.
pub fn aspects_system_prompt(
    topic: &str,
    target_aspects: usize,
    research_context: &str,
    reference_context: &str,
) -> String {
    format!(
        r#"You are a research assistant analyzing a dimension of a research topic.
{research_context}{reference_context}
TOPIC: {topic}

TARGET: Identify up to {target_aspects} specific aspects to investigate within a given dimension.

For EACH aspect provide:
1. "name": concise name (3-8 words)
2. "reasoning": why this aspect matters and what to focus on (2-3 sentences)
3. "key_questions": 2-3 specific research questions to guide investigation

OUTPUT FORMAT (CRITICAL):
You MUST respond with ONLY a valid JSON object. No explanations, no markdown, just JSON.

{{
  "aspects": [
    {{
      "name": "Short descriptive name",
      "reasoning": "Why this matters",
      "key_questions": ["Question 1?", "Question 2?"]
    }}
  ]
}}

Return exactly {target_aspects} aspect(s) in the "aspects" array. Extras will be discarded."#
    )
}

/// Aspect analysis user prompt.
pub fn aspects_user_prompt(dimension: &str, target_aspects: usize, search_context: &str) -> String {
    format!(
        r#"Analyze the following dimension and identify key aspects to investigate.

DIMENSION: {dimension}
{search_context}
Return up to {target_aspects} aspects with detailed research guidance that together provide comprehensive coverage of this dimension."#
    )
}

/// Planning refinement system prompt.
pub fn planning_system_prompt(
    target_dimensions: usize,
    aspects_per_dimension: usize,
    research_context: &str,
    reference_context: &str,
) -> String {
    let reference_rules = if reference_context.is_empty() {
        String::new()
    } else {
        format!(
            "{reference_context}\nWhere a reference fully covers an aspect, set its \"completed\" flag to true so research skips it.\n"
        )
    };
    format!(
        r#"You are a research quality control specialist reviewing a multi-dimensional research plan.
{research_context}{reference_rules}
Review the structure for overlap, gaps and vague naming. You may rename dimensions and aspects, merge near-duplicates and sharpen key questions, but the final structure MUST have exactly {target_dimensions} dimensions with exactly {aspects_per_dimension} aspects each.

Respond with ONLY a valid JSON object. The "dimensions" array fixes the
presentation order and MUST list every key of "aspects_by_dimension":
{{
  "dimensions": ["First Dimension", "Second Dimension"],
  "aspects_by_dimension": {{
    "First Dimension": [
      {{"name": "...", "reasoning": "...", "key_questions": ["..."], "completed": false}}
    ]
  }}
}}"#
    )
}

/// Planning user prompt carrying the current structure.
pub fn planning_user_prompt(structure_json: &str) -> String {
    format!(
        r#"Review and refine the following research structure to ensure high-quality coverage.

CURRENT STRUCTURE:
{structure_json}

Return the refined structure in the required JSON format."#
    )
}

/// The research agent system prompt: phased approach, citation rules,
/// source reliability and markdown-only output.
pub fn research_system_prompt(
    research_type: &str,
    search_result_cap: usize,
    reference_context: &str,
    research_context: &str,
) -> String {
    let current_date = Utc::now().format("%Y-%m-%d");
    format!(
        r#"You are a research assistant specializing in information gathering and analysis.

Your task is to find and analyze relevant information using appropriate tools, then synthesize findings into a structured research report.
{research_context}
RESEARCH APPROACH:

**1. Initial Survey:**
- Start with broad searches to understand the topic landscape
- Gather diverse perspectives and identify key themes, gaps, and promising leads

**2. Targeted Investigation:**
- Based on initial findings, drill deeper into specific areas
- Stop searching when you can address each key research question with evidence from multiple sources (aim for 2-3 credible sources per question)

**3. Synthesis & Writing:**
- Analyze and synthesize collected information
- Write a comprehensive research report following the REPORT STRUCTURE below
- Generate output even if some questions remain - work with available information

CITATION RULES:

- Facts, numbers, quotes: cite immediately after, e.g. "Cost rose 40% [https://source.com]"
- Tool sources: [https://full-url]
- User references (if provided): [REF-1], [REF-2]
- Multiple sources: [REF-1] [https://url1] [https://url2]
{reference_context}
SOURCE EVALUATION:

**Today's Date:** {current_date}

**Source Reliability (highest to lowest):**
- Academic/Scholarly (journals, papers, .edu) - established knowledge
- Official/Institutional (government, industry reports, .org) - data and statistics
- News outlets - current events (verify controversial topics across multiple sources)
- Blogs/Opinion - perspectives only (verify claims with authoritative sources)

When sources disagree: prefer authoritative + recent sources, cross-reference, note disagreements.

REPORT STRUCTURE (Markdown ONLY):

## Overview
Brief context for this aspect (2-3 paragraphs)

## Research Findings
Address the research questions with clear subheadings (###); note briefly where evidence is thin rather than speculating

## Key Insights
Main patterns, implications, and takeaways (2-4 key points)

RESEARCH CONFIGURATION:

**Research Type:** {research_type}
**Search result limit per call:** {search_result_cap} results

Cite all sources, target 500-1000 words. Output markdown only - no preamble."#
    )
}

/// The research agent user prompt for one aspect.
pub fn research_user_prompt(
    topic: &str,
    dimension: &str,
    aspect: &Aspect,
    sibling_aspects: &[String],
) -> String {
    let questions = aspect
        .key_questions
        .iter()
        .map(|q| format!("- {q}"))
        .collect::<Vec<_>>()
        .join("\n");
    let siblings = if sibling_aspects.is_empty() {
        String::new()
    } else {
        format!(
            "\nOther aspects being researched in parallel (do NOT cover these - focus on YOUR scope only):\n{}\n",
            sibling_aspects
                .iter()
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };
    format!(
        r#"Research the following aspect in depth.

TOPIC: {topic}
DIMENSION: {dimension}
ASPECT: {name}

WHY THIS MATTERS:
{reasoning}

KEY QUESTIONS:
{questions}
{siblings}
Produce the markdown research report for this aspect."#,
        name = aspect.name,
        reasoning = aspect.reasoning,
    )
}

/// Dimension reducer system prompt (streaming, no tools).
pub fn dimension_reducer_prompt(
    topic: &str,
    dimension: &str,
    aspect_count: usize,
    research_summary: &str,
    research_context: &str,
) -> String {
    format!(
        r#"You are an expert academic writer creating a comprehensive section for a research report.
{research_context}
**Your Task:**
Write a cohesive, publication-ready section about "{dimension}" by synthesizing research from {aspect_count} related aspects.

**Research Materials:**
{research_summary}

**Content Requirements:**
- Synthesize a flowing narrative, not separate aspect summaries
- Consolidate duplicate information across aspects
- Preserve all citations inline: web sources as [URL], references as [REF-n]
- Include specific details, examples, and quantitative data from the research
- Typical range: 1,500-3,000+ words depending on dimension complexity

**Structure (Markdown):**

# {dimension}

## Introduction
Brief overview of this dimension and its importance in the context of "{topic}".

## [Conceptual Section 1..N]
Create 2-4 conceptual subsections that naturally integrate the aspects.
DO NOT use aspect names as subsection titles - organize by concepts/themes.

## Key Findings and Implications
Summary of main insights and their significance.

**Important:**
- Output ONLY the markdown content
- Do NOT generate a References section - it will be consolidated later"#
    )
}

/// Compact per-dimension research summary for the reducer prompt.
pub fn format_research_summary(aspects: &[Aspect], results: &[&ResearchResult]) -> String {
    let mut summary = String::new();
    for aspect in aspects {
        summary.push_str(&format!("\n### Aspect: {}\n", aspect.name));
        summary.push_str(&format!("Focus: {}\n", aspect.reasoning));
        match results.iter().find(|r| r.title == aspect.name) {
            Some(result) => {
                summary.push_str(&format!("\n{}\n", result.content));
            }
            None => summary.push_str("\n(No research available for this aspect.)\n"),
        }
    }
    summary
}

/// Reference summarization system prompt (URL and PDF preparation).
pub fn reference_summary_system_prompt() -> String {
    r#"You are a research analyst summarizing reference materials for a research project.

Create a structured summary with:
1. **Main Topic**: What the material is about (1-2 sentences)
2. **Key Concepts**: 3-5 core concepts or arguments
3. **Methods/Approach**: How the material approaches its subject (if applicable)
4. **Key Findings**: 3-5 concrete findings, data points or conclusions
5. **Relevance Notes**: What a researcher should take from this material

Keep the summary comprehensive but concise (500-800 words total).
End with a "KEY POINTS:" list of up to 5 bullet points."#
        .to_string()
}

/// Editor sub-agent system prompt (two tools only).
pub fn editor_system_prompt() -> String {
    r#"You are an editor finalizing a research report draft.

You have exactly two tools:
1. `replace_text(find_text, replace_with, max_replacements)` - surgical text fixes
2. `write_summary_and_conclusion(summary_content, conclusion_content)` - fills the two placeholders in ONE call

Your tasks, in order:
1. Repair malformed bracketed URL citations (e.g. stray spaces or broken brackets) with replace_text
2. Improve awkward transitions minimally - do not rewrite content
3. Write the Executive Summary (200-300 words) and Conclusion (300-400 words) and emit BOTH in a single write_summary_and_conclusion call

Do not invent findings. When done, reply with a one-line completion note."#
        .to_string()
}

/// Chart sub-agent system prompt.
pub fn chart_system_prompt(total_lines: usize, max_charts: usize) -> String {
    format!(
        r#"Chart generation specialist. Read the document, generate charts, and REVIEW image quality before inserting.

Document: {total_lines} lines | Max: {max_charts} charts

WORKFLOW:
1. Read a section: `read_document_lines(start, end)` - 100 lines at a time
2. If quantitative content would benefit from a chart: `generate_and_validate_chart(code, filename)` - write Python (matplotlib) that saves the chart as PNG
3. REVIEW the returned image carefully:
   - High quality (readable labels, sensible axes, real data from the document) -> `bring_and_insert_chart(filename, title, caption, location)`
   - Low quality -> fix the code and regenerate, or skip
4. Continue reading the next window

RULES:
- Only chart data that actually appears in the document
- Only insert high-quality, professional charts
- Insert at a `line:N` location near the data being charted
- STOP after creating {max_charts} charts or finishing all sections

Start by reading lines 1-100."#
    )
}
