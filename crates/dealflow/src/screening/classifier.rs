//! One LLM classification of a company against a criterion.

use serde::Deserialize;
use std::time::Duration;

use crate::llm::{ChatMessage, ChatResponse, GenerationConfig, LLMProvider};
use crate::parsing::find_json_value;
use crate::types::{Company, Criterion, ScreeningOutcome, ScreeningResult};

const CLASSIFIER_PROMPT: &str = "You screen acquisition targets against investment criteria. \
Judge only from the company data given. Answer with a JSON object and nothing else:
{\"result\": \"pass\" | \"fail\" | \"inconclusive\", \"remarks\": \"one or two sentences of reasoning\"}
Use \"inconclusive\" when the data does not allow a decision. Use \"error\" only if the \
criterion itself cannot be evaluated.";

pub fn build_messages(company: &Company, criterion: &Criterion) -> Vec<ChatMessage> {
    let mut profile = format!("Company: {}\n", company.name);
    let fields = [
        ("Sector", company.sector.as_deref()),
        ("Segment", company.segment.as_deref()),
        ("Country", company.country.as_deref()),
        ("Focus", company.focus.as_deref()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            profile.push_str(&format!("{}: {}\n", label, value));
        }
    }
    if let Some(ev) = company.enterprise_value {
        profile.push_str(&format!("Enterprise value: {}\n", ev));
    }
    let mut years = company.financials.clone();
    years.sort_by_key(|f| f.year);
    for f in years {
        profile.push_str(&format!(
            "{}: revenue {}, EBITDA {}\n",
            f.year,
            f.revenue.map(|v| v.to_string()).unwrap_or_else(|| "n/a".into()),
            f.ebitda.map(|v| v.to_string()).unwrap_or_else(|| "n/a".into()),
        ));
    }

    vec![
        ChatMessage::system(CLASSIFIER_PROMPT),
        ChatMessage::user(format!(
            "Criterion \"{}\": {}\n\n{}",
            criterion.name, criterion.prompt, profile
        )),
    ]
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    result: String,
    #[serde(default)]
    remarks: Option<String>,
}

/// Parse the model's answer. Accepts fenced or bare JSON and loose casing.
pub fn parse_classification(text: &str) -> Result<(ScreeningResult, Option<String>), String> {
    let value = find_json_value(text).ok_or_else(|| "model answer contained no JSON object".to_string())?;
    let raw: RawClassification =
        serde_json::from_value(value).map_err(|e| format!("unexpected classification shape: {}", e))?;
    let result = raw.result.parse::<ScreeningResult>()?;
    let remarks = raw.remarks.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    Ok((result, remarks))
}

/// Run the classification. Transport errors, timeouts and unparseable answers
/// come back as `Failed`.
pub async fn classify(
    llm: &dyn LLMProvider,
    company: &Company,
    criterion: &Criterion,
    generation: &GenerationConfig,
    timeout: Duration,
) -> ScreeningOutcome {
    let messages = build_messages(company, criterion);
    let response = match tokio::time::timeout(timeout, llm.chat(&messages, &[], generation)).await {
        Err(_) => {
            return ScreeningOutcome::Failed {
                remarks: format!("classification timed out after {}s", timeout.as_secs()),
            }
        }
        Ok(Err(e)) => {
            return ScreeningOutcome::Failed {
                remarks: format!("classification call failed: {}", e),
            }
        }
        Ok(Ok(response)) => response,
    };

    let text = match response {
        ChatResponse::Content(text) => text,
        ChatResponse::ToolCalls(_) => {
            return ScreeningOutcome::Failed {
                remarks: "model requested tools during classification".to_string(),
            }
        }
    };

    match parse_classification(&text) {
        Ok((result, remarks)) => ScreeningOutcome::Completed { result, remarks },
        Err(reason) => ScreeningOutcome::Failed { remarks: reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;

    #[test]
    fn test_parse_variants() {
        let (r, remarks) = parse_classification(r#"{"result": "PASS", "remarks": "EBITDA 22%"}"#).unwrap();
        assert_eq!(r, ScreeningResult::Pass);
        assert_eq!(remarks.as_deref(), Some("EBITDA 22%"));

        let fenced = "Sure.\n```json\n{\"result\": \"inconclusive\"}\n```";
        assert_eq!(parse_classification(fenced).unwrap().0, ScreeningResult::Inconclusive);

        assert!(parse_classification("It passes.").is_err());
        assert!(parse_classification(r#"{"result": "maybe"}"#).is_err());
    }

    #[test]
    fn test_prompt_includes_financials() {
        let mut company = Company::new("Acme");
        company.financials = vec![crate::types::YearlyFinancials { year: 2023, revenue: Some(12.5), ebitda: None }];
        let messages = build_messages(&company, &Criterion::new("Size", "Revenue above 10"));
        let user = messages[1].content.as_deref().unwrap();
        assert!(user.contains("Revenue above 10"));
        assert!(user.contains("2023: revenue 12.5, EBITDA n/a"));
    }

    #[tokio::test]
    async fn test_classify_timeout_fails_row() {
        let llm = ScriptedProvider::new(vec![ChatResponse::Content(r#"{"result":"pass"}"#.into())])
            .with_delay(Duration::from_millis(200));
        let outcome = classify(
            &llm,
            &Company::new("Acme"),
            &Criterion::new("c", "p"),
            &GenerationConfig::default(),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(outcome, ScreeningOutcome::Failed { .. }));
    }
}
