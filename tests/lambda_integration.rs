//! S1 (spec.md §8): "`aws_lambda_name=quarantine`, `aws_lambda_invocation_type=Event`
//! is a valid, complete rule parameterization on its own." This exercises
//! the same full rule-load path `wardend rules validate` runs, with the
//! real `aws:lambda` actionner registered, rather than a recording stub —
//! the regression this guards against is a rule written exactly as S1
//! prescribes failing `RuleSet::try_build` because the actionner looks for
//! differently-named parameter keys.
//!
//! The real `aws-sdk-lambda` client never talks to a socket here: rule
//! loading only calls `check_parameters`, which is pure parameter
//! inspection and never touches the network.

use aws_sdk_lambda::config::{BehaviorVersion, Region};
use aws_sdk_lambda::{Client as LambdaClient, Config};
use warden::actionners::aws::LambdaActionner;
use warden::registry::{ActionnerRegistryBuilder, NotifierRegistryBuilder, OutputRegistryBuilder};
use warden::ruleset::load_rules_from_yaml;

fn lambda_client() -> LambdaClient {
    let conf = Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .build();
    LambdaClient::from_conf(conf)
}

const S1_RULE: &str = r#"
- name: quarantine-on-reverse-shell
  tags: ["T1059"]
  priority_floor: critical
  actions:
    - name: quarantine
      actionner: aws:lambda
      parameters:
        aws_lambda_name: quarantine
        aws_lambda_invocation_type: Event
"#;

#[test]
fn s1_rule_validates_with_the_spec_named_parameter_keys() {
    let mut actionner_builder = ActionnerRegistryBuilder::new();
    actionner_builder
        .register(std::sync::Arc::new(LambdaActionner::new(lambda_client())))
        .unwrap();
    let actionners = actionner_builder.freeze();
    let outputs = OutputRegistryBuilder::new().freeze();
    let notifiers = NotifierRegistryBuilder::new().freeze();

    let rule_set = load_rules_from_yaml(S1_RULE, &actionners, &outputs, &notifiers)
        .expect("a rule written exactly as S1 prescribes must validate");
    assert_eq!(rule_set.len(), 1);
    assert_eq!(rule_set.iter().next().unwrap().name(), "quarantine-on-reverse-shell");
}

/// The pre-fix parameter names (`function_name`/`invocation_type`) must be
/// rejected rather than silently accepted — otherwise a rule author who
/// copies an old example would get a confusing runtime failure instead of
/// a load-time one.
#[test]
fn the_old_non_spec_parameter_names_are_rejected() {
    const OLD_STYLE_RULE: &str = r#"
- name: quarantine-on-reverse-shell
  actions:
    - name: quarantine
      actionner: aws:lambda
      parameters:
        function_name: quarantine
        invocation_type: Event
"#;

    let mut actionner_builder = ActionnerRegistryBuilder::new();
    actionner_builder
        .register(std::sync::Arc::new(LambdaActionner::new(lambda_client())))
        .unwrap();
    let actionners = actionner_builder.freeze();
    let outputs = OutputRegistryBuilder::new().freeze();
    let notifiers = NotifierRegistryBuilder::new().freeze();

    let err = load_rules_from_yaml(OLD_STYLE_RULE, &actionners, &outputs, &notifiers).unwrap_err();
    assert!(matches!(err, warden::error::RuleError::InvalidParameters { .. }));
}
