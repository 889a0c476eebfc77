//! Prompt assembly for the two evaluator passes.

use crate::types::SideVerdict;

/// System prompt for the structured pass. The evaluator must answer with the
/// verdict JSON and nothing else.
pub const VERDICT_SYSTEM: &str = "당신은 공정한 토론 심판입니다. 양측의 발언을 논리성, 근거, 설득력 기준으로 평가하고, \
반드시 JSON 형식으로만 답변하세요. 다른 텍스트를 추가하지 마세요.";

/// System prompt for the narration pass.
pub const NARRATION_SYSTEM: &str = "당신은 토론 심판입니다. 주어진 평가 결과를 참가자들에게 전달할 자연스러운 한국어 문단으로 \
요약하세요. 점수와 승자를 반드시 언급하세요.";

fn push_turns(out: &mut String, heading: &str, turns: &[String]) {
    out.push_str(heading);
    out.push('\n');
    if turns.is_empty() {
        out.push_str("(발언 없음)\n");
    }
    for (i, turn) in turns.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, turn));
    }
    out.push('\n');
}

/// User prompt for the structured pass: subject title plus the concatenation
/// of each side's turns, followed by the output contract.
pub fn build_verdict_prompt(
    subject_title: &str,
    agree_turns: &[String],
    disagree_turns: &[String],
) -> String {
    let mut prompt = format!("토론 주제: {subject_title}\n\n");
    push_turns(&mut prompt, "[찬성측 발언]", agree_turns);
    push_turns(&mut prompt, "[반대측 발언]", disagree_turns);
    prompt.push_str(
        "위 토론을 평가하여 아래 JSON 형식으로만 답변하세요:\n\
         {\n\
           \"agree\": {\"score\": 0-100, \"good\": \"잘한 점\", \"bad\": \"아쉬운 점\"},\n\
           \"disagree\": {\"score\": 0-100, \"good\": \"잘한 점\", \"bad\": \"아쉬운 점\"},\n\
           \"winner\": \"agree\" 또는 \"disagree\"\n\
         }",
    );
    prompt
}

/// User prompt for the narration pass.
pub fn build_narration_prompt(agree: &SideVerdict, disagree: &SideVerdict, winner: &str) -> String {
    let winner_label = if winner == "agree" {
        "찬성측"
    } else {
        "반대측"
    };
    format!(
        "평가 결과입니다.\n\
         찬성측: {}점 / 잘한 점: {} / 아쉬운 점: {}\n\
         반대측: {}점 / 잘한 점: {} / 아쉬운 점: {}\n\
         승자: {}\n\n\
         이 결과를 참가자들에게 전달할 한 문단의 판정문으로 작성하세요.",
        agree.score, agree.good, agree.bad, disagree.score, disagree.good, disagree.bad,
        winner_label
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_prompt_contains_subject_and_turns() {
        let prompt = build_verdict_prompt(
            "사형제도는 폐지되어야 한다",
            &["첫 번째 발언".to_string()],
            &[],
        );
        assert!(prompt.contains("사형제도는 폐지되어야 한다"));
        assert!(prompt.contains("1. 첫 번째 발언"));
        assert!(prompt.contains("(발언 없음)"));
        assert!(prompt.contains("\"winner\""));
    }
}
