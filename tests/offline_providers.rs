use std::path::PathBuf;

use serde_json::json;

use flagswitch::{
    registry, ClientConfig, EvaluationContext, FlagsmithConfig, GrowthBookConfig,
    LaunchDarklyConfig, MemoryChoiceStore, Reason,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_data(path: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test-data")
        .join(path)
        .to_string_lossy()
        .into_owned()
}

fn config(provider_id: &str) -> ClientConfig {
    ClientConfig::new()
        .choice_store(MemoryChoiceStore::with_choice(provider_id))
        .flagsmith(FlagsmithConfig {
            environment_file: test_data("flagsmith/environment.json"),
            ..FlagsmithConfig::default()
        })
        .growthbook(GrowthBookConfig {
            features_file: test_data("growthbook/features.json"),
        })
        .launchdarkly(LaunchDarklyConfig {
            flags_file: test_data("launchdarkly/flags.json"),
            ..LaunchDarklyConfig::default()
        })
}

#[tokio::test]
async fn flagsmith_environment() {
    init();
    let client = config(registry::FLAGSMITH_OFFLINE).to_client();
    client.ensure_active().await.unwrap();

    let pradyun = EvaluationContext::for_user("pradyun");
    let alice = EvaluationContext::for_user("alice");
    let pro = EvaluationContext::for_user("carol").with_attribute("plan", "pro");

    let badge = client.get_boolean_details("new-badge", false, Some(&pradyun));
    assert!(badge.value);
    assert_eq!(badge.reason, Reason::Static);
    assert_eq!(badge.variant, None);
    assert!(!client.get_boolean_value("new-badge", true, Some(&alice)));

    assert_eq!(client.get_string_value("cta-color", "red", Some(&alice)), "blue");
    assert_eq!(client.get_string_value("cta-color", "red", Some(&pro)), "gold");
    assert_eq!(client.get_string_value("cta-color", "red", Some(&pradyun)), "green");

    assert_eq!(client.get_number_value("max-items", 10.0, Some(&alice)), 25.0);
    assert_eq!(client.get_number_value("cta-color", 10.0, Some(&alice)), 10.0);
    assert_eq!(
        client.get_object_value("banner", &json!(null), Some(&alice)),
        json!({"title": "Welcome", "dismissible": true})
    );

    // The only segment override uses an unsupported operator.
    assert!(!client.get_boolean_value("beta-search", true, Some(&pradyun)));

    let missing = client.get_string_details("missing", "fallback", Some(&alice));
    assert_eq!(missing.value, "fallback");
    assert_eq!(missing.reason, Reason::Static);
}

#[tokio::test]
async fn growthbook_features() {
    init();
    let client = config(registry::GROWTHBOOK).to_client();
    client.ensure_active().await.unwrap();

    let pradyun = EvaluationContext::for_user("pradyun");
    let alice = EvaluationContext::for_user("alice");

    assert!(client.get_boolean_value("new-badge", false, Some(&pradyun)));
    assert!(!client.get_boolean_value("new-badge", false, Some(&alice)));
    assert_eq!(client.get_string_value("cta-color", "red", Some(&pradyun)), "green");
    assert_eq!(client.get_string_value("cta-color", "red", Some(&alice)), "blue");
    assert_eq!(client.get_number_value("max-items", 0.0, None), 25.0);
}

#[tokio::test]
async fn launchdarkly_flag_file() {
    init();
    let client = config(registry::LAUNCHDARKLY_OFFLINE).to_client();
    client.ensure_active().await.unwrap();

    let pradyun = EvaluationContext::for_user("pradyun");
    let alice = EvaluationContext::for_user("alice");

    assert!(client.get_boolean_value("new-badge", false, Some(&pradyun)));
    assert!(!client.get_boolean_value("new-badge", true, Some(&alice)));
    assert_eq!(client.get_string_value("cta-color", "red", None), "blue");
    assert_eq!(client.get_number_value("max-items", 0.0, None), 25.0);

    let mut keys = client.active_provider().unwrap().flag_keys();
    keys.sort();
    assert_eq!(keys, vec!["cta-color", "max-items", "new-badge"]);
}

#[tokio::test]
async fn reload_of_unchanged_document_yields_identical_results() {
    init();
    let client = config(registry::FLAGSMITH_OFFLINE).to_client();
    client.ensure_active().await.unwrap();

    let contexts = [
        EvaluationContext::for_user("pradyun"),
        EvaluationContext::for_user("alice"),
        EvaluationContext::for_user("carol").with_attribute("plan", "pro"),
    ];
    let read = |client: &flagswitch::Client| {
        contexts
            .iter()
            .map(|context| {
                (
                    client.get_boolean_details("new-badge", false, Some(context)),
                    client.get_string_details("cta-color", "red", Some(context)),
                    client.get_object_details("banner", &json!({}), Some(context)),
                )
            })
            .collect::<Vec<_>>()
    };

    let before = read(&client);
    client.reload().await.unwrap();
    assert_eq!(read(&client), before);
}
