use chrono::{TimeZone, Utc};
use grading::{
    aggregate_by_essay_type, build_grading_prompt, prepare_result, prompt_fingerprint, validate_essay, IdField,
    ModelReply, ResultContext,
};
use rubric::{normalize, RubricRecord};
use serde_json::json;

#[test]
fn test_validate_prompt_reply_aggregate() {
    let rubric = normalize(
        &RubricRecord::from_value(json!({
            "essay_type": {"S": "Narrative"},
            "essay_id": {"S": "Lighthouse_Grade7_20250101_000000"},
            "score_range": {"S": "1 to 4"},
            "rubrics": {"M": {
                "score_4": {"M": {"score_label": {"S": "Vivid"}, "voice": {"S": "distinct"}, "structure": {"S": "tight"}}},
                "score_1": {"M": {"score_label": {"S": "Flat"}, "voice": {"S": "absent"}, "structure": {"S": "none"}}},
            }},
        }))
        .unwrap(),
    );

    let payloads = [
        json!({"studentId": "a", "contentId": "Lighthouse_Grade7_20250101_000000", "essayType": "Narrative", "essayResponse": "One."}),
        json!({"student_id": "b", "content_id": "Lighthouse_Grade7_20250101_000000", "essay_type": "Narrative", "essay_response": "Two."}),
    ];
    let replies = [
        json!({"overall_essay_score": 4, "rubric_metric_scores": {"voice": 4, "structure": 4}, "ai_confidence": 90}),
        json!({"overall_essay_score": 9, "rubric_metric_scores": {"voice": 2, "structure": 1}, "ai_confidence": 75, "essay_flagged": "Yes", "flag_reason": "off_topic"}),
    ];

    let mut results = Vec::new();
    for (i, (payload, reply)) in payloads.iter().zip(replies.iter()).enumerate() {
        let input = validate_essay(payload, IdField::ContentId).unwrap();
        let prompt = build_grading_prompt(&input, &rubric);
        assert!(prompt.contains("\"voice\": [1-4],"));

        let reply = ModelReply::parse(&reply.to_string()).unwrap();
        let ctx = ResultContext {
            grader_model: "m",
            graded_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            prompt_fingerprint: prompt_fingerprint(&prompt),
            essay_index: Some(i),
        };
        results.push(prepare_result(&input, &rubric, &reply, ctx));
    }

    assert_eq!(results[1].essay_score, 4);
    assert!(results[1].score_validation.was_clamped);
    assert_ne!(results[0].prompt_fingerprint, results[1].prompt_fingerprint);

    let agg = aggregate_by_essay_type(&results);
    let narrative = &agg["Narrative"];
    assert_eq!(narrative.count, 2);
    assert_eq!(narrative.mean_score, 4.0);
    assert_eq!(narrative.mean_confidence, 82.5);
    assert_eq!(narrative.flagged_count, 1);
    assert_eq!(narrative.score_histogram["4"], 2);
}
