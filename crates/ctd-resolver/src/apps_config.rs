use serde_json::{json, Map, Value};

use crate::types::Cdf;

/// Assembles the WebOS `APPS_CONFIG` document from a CDF's `webosApp` and
/// `question` components. If any questions exist, a synthetic
/// `challenge-prompt` app is prepended holding a single instructions page.
pub fn build_apps_config(cdf: &Cdf, flag_secret_name: &str) -> Value {
    let mut apps = Vec::new();

    let questions = cdf.questions();
    if !questions.is_empty() {
        let description = cdf.metadata.description.clone().unwrap_or_default();
        let question_entries: Vec<Value> = questions
            .iter()
            .map(|q| {
                let content = q.prompt.clone().or_else(|| q.text.clone()).unwrap_or_default();
                let mut entry = json!({
                    "id": q.id,
                    "type": q.question_type,
                    "content": content,
                    "points": q.points,
                });
                if q.question_type != "flag" {
                    if let Some(answer) = &q.answer {
                        entry["answer"] = json!(answer);
                    }
                }
                if let Some(explanation) = &q.explanation {
                    entry["explanation"] = json!(explanation);
                }
                entry
            })
            .collect();

        apps.push(json!({
            "id": "challenge-prompt",
            "title": "Challenge Prompt",
            "description": description,
            "pages": [{
                "instructions": description,
                "questions": question_entries,
            }],
            "flagSecretName": flag_secret_name,
        }));
    }

    for app in cdf.webos_apps() {
        let mut entry = Map::new();
        entry.insert("id".to_string(), json!(app.id));
        entry.insert("icon".to_string(), json!(app.icon.clone().unwrap_or_else(|| "./icons/application.svg".to_string())));
        entry.insert("title".to_string(), json!(app.title.clone().unwrap_or_else(|| app.id.clone())));
        if let Some(width) = app.width {
            entry.insert("width".to_string(), json!(width));
        }
        if let Some(height) = app.height {
            entry.insert("height".to_string(), json!(height));
        }
        entry.insert("screen".to_string(), json!(app.screen.clone().unwrap_or_else(|| "displayChrome".to_string())));
        entry.insert("disabled".to_string(), json!(app.disabled.unwrap_or(false)));
        entry.insert("favourite".to_string(), json!(app.favourite.unwrap_or(false)));
        entry.insert("desktop_shortcut".to_string(), json!(app.desktop_shortcut.unwrap_or(false)));
        entry.insert("launch_on_startup".to_string(), json!(app.launch_on_startup.unwrap_or(false)));

        for (key, value) in &app.additional_config {
            entry.insert(key.clone(), value.clone());
        }

        apps.push(Value::Object(entry));
    }

    Value::Array(apps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CdfMetadata, QuestionComponent, WebosAppComponent, CdfComponent};

    fn base_cdf(components: Vec<CdfComponent>) -> Cdf {
        Cdf {
            metadata: CdfMetadata {
                id: None,
                name: "test".into(),
                challenge_type: "webos".into(),
                difficulty: None,
                description: Some("solve it".into()),
            },
            components,
            type_config: Map::new(),
            variables: Map::new(),
            templates: Vec::new(),
        }
    }

    #[test]
    fn prepends_challenge_prompt_when_questions_exist() {
        let cdf = base_cdf(vec![CdfComponent::Question(QuestionComponent {
            id: "q1".into(),
            question_type: "flag".into(),
            prompt: Some("find the flag".into()),
            text: None,
            points: Some(10),
            answer: Some("should not leak".into()),
            explanation: None,
        })]);

        let apps = build_apps_config(&cdf, "flag-secret-chal1");
        let arr = apps.as_array().unwrap();
        assert_eq!(arr[0]["id"], "challenge-prompt");
        assert_eq!(arr[0]["flagSecretName"], "flag-secret-chal1");
        let question = &arr[0]["pages"][0]["questions"][0];
        assert!(question.get("answer").is_none(), "flag answers must not be exposed");
    }

    #[test]
    fn webos_apps_get_defaults_when_fields_are_missing() {
        let cdf = base_cdf(vec![CdfComponent::WebosApp(WebosAppComponent {
            id: "terminal".into(),
            icon: None,
            title: None,
            width: None,
            height: None,
            screen: None,
            disabled: None,
            favourite: None,
            desktop_shortcut: None,
            launch_on_startup: None,
            additional_config: Map::new(),
        })]);

        let apps = build_apps_config(&cdf, "flag-secret-chal1");
        let app = &apps.as_array().unwrap()[0];
        assert_eq!(app["icon"], "./icons/application.svg");
        assert_eq!(app["title"], "terminal");
        assert_eq!(app["screen"], "displayChrome");
    }
}
