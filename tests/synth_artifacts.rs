use std::fs;

use serde_json::Value;
use tierstack::{
    ConfigOverrides, Stage, TemplateFormat, assemble,
    synth::{synthesize, write_artifacts},
};

#[test]
fn writes_template_plan_and_outputs_under_stage_dir() {
    let assembly = assemble(Stage::Prod, &ConfigOverrides::default()).expect("assembles");
    let artifacts = synthesize(&assembly, TemplateFormat::Json).expect("synthesizes");

    let out = tempfile::tempdir().expect("tempdir");
    let dir = write_artifacts(out.path(), &artifacts).expect("writes");
    assert_eq!(dir, out.path().join("prod"));

    let template: Value =
        serde_json::from_str(&fs::read_to_string(dir.join("template.json")).unwrap()).unwrap();
    let resources = template["Resources"].as_object().unwrap();
    assert_eq!(resources.len(), assembly.plan.resources().count());
    assert_eq!(resources["ProdKeyValueTable"]["DeletionPolicy"], "Retain");

    let outputs: Value =
        serde_json::from_str(&fs::read_to_string(dir.join("outputs.json")).unwrap()).unwrap();
    assert_eq!(
        outputs["DatabaseClusterEndpoint"],
        "${ProdDatabaseCluster.Endpoint.Address}"
    );

    let plan: tierstack::Plan =
        serde_json::from_str(&fs::read_to_string(dir.join("plan.json")).unwrap()).unwrap();
    assert_eq!(plan, assembly.plan);
}

#[test]
fn yaml_template_uses_yaml_file_name() {
    let assembly = assemble(Stage::Dev, &ConfigOverrides::default()).unwrap();
    let artifacts = synthesize(&assembly, TemplateFormat::Yaml).unwrap();
    let out = tempfile::tempdir().unwrap();
    let dir = write_artifacts(out.path(), &artifacts).unwrap();

    let yaml = fs::read_to_string(dir.join("template.yaml")).unwrap();
    assert!(yaml.contains("AWS::ElasticBeanstalk::Environment"));
    assert!(!dir.join("template.json").exists());
}

#[test]
fn secrets_are_generation_requests_in_the_template() {
    let assembly = assemble(Stage::Dev, &ConfigOverrides::default()).unwrap();
    let rendered = tierstack::render_template(&assembly, TemplateFormat::Json).unwrap();
    let template: Value = serde_json::from_str(&rendered).unwrap();
    let secret = &template["Resources"]["DevDatabasePassword"]["Properties"];
    assert_eq!(secret["GenerateSecretString"]["PasswordLength"], 20);
    assert!(secret.get("SecretString").is_none());
}
