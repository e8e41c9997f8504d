//! Grading prompt rendering.
//!
//! Everything here is a pure function of the essay and the normalized rubric.
//! The same inputs always render the same text, which is what
//! [`prompt_fingerprint`] records in each result.

use std::fmt::Write as _;

use tracing::warn;

use rubric::{NormalizedRubric, ScoreRange, ScoringGuidance, STANDARD_BORDERLINE_KEYS};

use crate::request::EssayInput;

const HEADER: &str = "You are an experienced essay grader reviewing writing from students in grades 5 through 12. \
Grade the student essay below against the rubric that follows and answer with a single JSON object \
containing scores and justifications.";

const STUDENT_APPROACH: &str = "## GRADING APPROACH FOR YOUNG WRITERS:
These essays come from students aged 10 to 18. Keep the following in mind:
- **Encourage**: give credit for genuine effort and partial attempts
- **Do not penalize spelling**: judge ideas and understanding, not spelling
- **Tolerate grammar slips** that are typical of young writers
- **Match expectations to age**: a grade 5 analysis differs from a grade 12 analysis
- **Content over mechanics**: understanding, analysis and ideas matter most
- **Partial credit** for ideas that are partly correct
- **Student voice**: value an authentic perspective even when it is not academic
- **Lean upward**: when torn between two scores, pick the higher one
- **Writing quality metrics** measure organization and clarity, not spelling";

const SAFETY: &str = "## SAFETY CHECK - SELF-HARM AND VIOLENCE (MANDATORY):
Before grading, read the essay for any sign of self-harm, suicidal thoughts or violence, including:
- Direct statements about hurting oneself, suicide or wanting to die
- Indirect references to ending one's life or harming oneself
- Hopelessness expressed together with any self-harm indicator
- Mentions of methods of self-harm or suicide
- Statements about not wanting to be alive
- Threats toward other people or violent ideation

**When any such content is present:**
1. Set essay_flagged to \"Yes\"
2. Set flag_reason to \"self_harm\"
3. Put the EXACT sentences of concern in flagged_content as an array
4. Still grade the essay, but the safety flag takes priority";

const WRITING_QUALITY_NOTE: &str = "**WRITING QUALITY METRICS**: judge only
- How ideas are organized and structured
- How clearly they are expressed
- How well the argument flows and holds together
**IGNORE**: spelling errors and small grammar mistakes typical of young writers";

const REMINDERS: &str = "**FINAL REMINDERS:**
- overall_essay_score is the rounded average of the valid metric scores
- Essays of different quality must receive different overall scores
- Be encouraging but honest about the work of young students
- Respond with the JSON object ONLY, no text before or after it
- If self-harm content is present, student safety comes before academics";

/// Lowest metric score that is excluded from the overall average.
///
/// Metric scores strictly above this value count as valid.
pub fn valid_metric_floor(range: ScoreRange) -> i64 {
    if range.min > 0 {
        range.min - 1
    } else {
        0
    }
}

/// Overall score the prompt instructs the model to produce: the mean of the
/// valid metric scores, rounded half to even. `None` when no score is valid.
pub fn expected_overall_score(metric_scores: &[f64], range: ScoreRange) -> Option<i64> {
    let floor = valid_metric_floor(range) as f64;
    let valid: Vec<f64> = metric_scores.iter().copied().filter(|s| *s > floor).collect();
    if valid.is_empty() {
        return None;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    Some(mean.round_ties_even() as i64)
}

pub fn build_grading_prompt(input: &EssayInput, rubric: &NormalizedRubric) -> String {
    if rubric.metric_names.is_empty() {
        warn!(
            essay_type = %rubric.essay_type,
            rubric_id = ?rubric.rubric_id,
            "rubric has no metrics, prompt schema will be empty"
        );
    }

    let range = rubric.score_range;
    let range_text = &rubric.score_range_raw;
    let question = rubric.essay_question.as_deref().unwrap_or("Not specified");

    let mut p = String::new();
    p.push_str(HEADER);
    p.push_str("\n\n## Essay Information\n");
    let _ = writeln!(p, "**Essay Type:** {}", input.essay_type);
    let _ = writeln!(p, "**Essay Question:** {question}");
    let _ = writeln!(p, "**Score Range:** {range_text}");
    p.push_str("**Student Population:** Grades 5-12 (ages 10-18), use age-appropriate expectations\n");

    p.push_str("\n## Student Essay:\n");
    p.push_str(&input.essay_response);
    p.push_str("\n\n## Rubric Criteria:\n");
    p.push_str(&render_bands(rubric));

    p.push_str("\n## Scoring Guidance:\n");
    p.push_str(&render_guidance(&rubric.guidance));

    p.push_str("\n\n");
    p.push_str(STUDENT_APPROACH);
    p.push_str("\n\n");
    p.push_str(SAFETY);
    p.push_str("\n\n");
    p.push_str(&render_calculation(range, range_text));
    p.push_str("\n\n");
    p.push_str(&render_steps(range));
    p.push_str("\n\n");
    p.push_str(WRITING_QUALITY_NOTE);
    p.push_str("\n\n");
    p.push_str(&render_schema(&rubric.metric_names, range, range_text));
    p.push_str("\n\n");
    p.push_str(REMINDERS);
    p
}

/// BLAKE3 of the rendered prompt, hex encoded.
pub fn prompt_fingerprint(prompt: &str) -> String {
    hex::encode(blake3::hash(prompt.as_bytes()).as_bytes())
}

fn render_bands(rubric: &NormalizedRubric) -> String {
    let mut out = String::new();
    for band in rubric.bands_by_level() {
        let heading = match band.level {
            Some(n) => format!("SCORE {n}"),
            None => band.key.to_uppercase(),
        };
        let label = band
            .label
            .clone()
            .unwrap_or_else(|| match band.level {
                Some(n) => format!("Score {n}"),
                None => band.key.clone(),
            });
        let _ = writeln!(out, "\n## {heading} - {label}");

        for metric in &rubric.metric_names {
            // metrics a band does not describe are left out
            if let Some(text) = band.criterion(metric) {
                let _ = writeln!(out, "{}: {text}", title_case(&metric.replace('_', " ")));
            }
        }
        out.push('\n');
    }
    out
}

fn render_guidance(guidance: &ScoringGuidance) -> String {
    let mut out = String::from("**Borderline Cases:**\n");
    for key in STANDARD_BORDERLINE_KEYS {
        let _ = writeln!(out, "- {}: {}", borderline_title(key), guidance.borderline(key));
    }
    for (key, text) in &guidance.borderline_cases {
        if !STANDARD_BORDERLINE_KEYS.contains(&key.as_str()) {
            let _ = writeln!(out, "- {}: {text}", borderline_title(key));
        }
    }
    let _ = write!(out, "\n**Common Pitfalls:** {}", guidance.common_pitfalls);
    out
}

fn render_calculation(range: ScoreRange, range_text: &str) -> String {
    let (min, max) = (range.min, range.max);
    let floor = valid_metric_floor(range);

    // worked example: three metrics one below the top, three one above the bottom
    let high = max.saturating_sub(1);
    let low = min.saturating_add(1);
    let sum = high.saturating_mul(3).saturating_add(low.saturating_mul(3));
    let example = [high, high, low, low, high, low].map(|s| s as f64);
    let mean = example.iter().sum::<f64>() / 6.0;
    let rounded = expected_overall_score(&example, range)
        .unwrap_or_else(|| mean.round_ties_even() as i64);

    format!(
        "## OVERALL SCORE CALCULATION:
**CRITICAL**: compute the overall essay score exactly like this:

1. **First**: score every rubric metric on its own, on the {min}-{max} scale, using the criteria above
2. **Then**: combine the metric scores
   - Add up the metric scores that are > {floor}
   - Divide by how many metric scores were added
   - Round to the nearest whole number inside the score range ({range_text})

**Worked example on the {range_text} scale:**
With content_understanding={high}, question_addressing={high}, analysis={low}, evidence={low}, performance={high}, writing={low}
- Sum: {sum}
- Valid metric count: 6
- Average: {mean}
- Overall score after rounding: {rounded} (inside {range_text})

**Note**: essays of different quality must receive different overall scores. Do not give every essay the same score.",
        mean = py_float(mean),
    )
}

fn render_steps(range: ScoreRange) -> String {
    let (min, max) = (range.min, range.max);
    format!(
        "## Grading Steps:
1. **FIRST**: check for self-harm content and set the flags
2. Read the essay closely with age-appropriate expectations
3. Compare it against every score level of the rubric
4. Score each metric on the {min}-{max} scale, leniently and encouragingly
5. **IGNORE SPELLING ERRORS** in every metric
6. **COMPUTE the overall score as the average of metric scores (see above)**
7. Justify the scores you gave
8. State your confidence (0-100%)
9. Flag any other concerning content"
    )
}

fn render_schema(metrics: &[String], range: ScoreRange, range_text: &str) -> String {
    let mut scores = String::from("{\n");
    let mut reasons = String::from("{\n");
    for (i, metric) in metrics.iter().enumerate() {
        let comma = if i + 1 < metrics.len() { "," } else { "" };
        let _ = writeln!(scores, "    \"{metric}\": [{}-{}]{comma}", range.min, range.max);
        let _ = writeln!(reasons, "    \"{metric}\": \"[Brief explanation for this score]\"{comma}");
    }
    scores.push_str("  }");
    reasons.push_str("  }");

    format!(
        "## Required JSON Response Format:
{{
  \"overall_essay_score\": [AVERAGE OF METRIC SCORES - must be within {range_text}],
  \"score_justification\": \"[QUALITATIVE reasons this essay earns this score level: understanding, analysis, strengths and weaknesses of the writing. Do NOT describe arithmetic or averaging here.]\",
  \"rubric_metric_scores\": {scores},
  \"metric_justifications\": {reasons},
  \"ai_confidence\": [0-100],
  \"confidence_explanation\": \"[Why this confidence level]\",
  \"essay_flagged\": \"[Yes/No]\",
  \"flagged_content\": [\"exact sentences that caused the flag, or an empty array\"],
  \"flag_reason\": \"[self_harm/inappropriate_content/plagiarism_suspected/off_topic/incoherent, or empty string if not flagged]\",
  \"strengths\": \"[2-3 specific strengths, encouraging for young students]\",
  \"areas_for_improvement\": \"[2-3 specific areas to grow, constructive for young learners]\"
}}"
    )
}

/// `between_2_3` → `Between 2-3`
fn borderline_title(key: &str) -> String {
    match key.strip_prefix("between_") {
        Some(rest) => format!("Between {}", rest.replace('_', "-")),
        None => title_case(&key.replace('_', " ")),
    }
}

/// Upper-cases the first letter of every word and lower-cases the rest.
/// Any non-letter starts a new word.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Float text with a trailing `.0` for whole numbers, e.g. `2.0`, `1.5`.
fn py_float(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        format!("{x}")
    }
}
