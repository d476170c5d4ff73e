//! Inventory generation tests

use std::process::Command;

use nessus_deployer::deploy::inventory::{render_inventory, InventoryBuilder};
use nessus_deployer::errors::DeployerError;
use secrecy::SecretString;

use crate::support::{leftover_inventories, request};

const TRICKY_VALUES: [&str; 7] = [
    "plain",
    "semi; rm -rf /tmp/x",
    "$(touch /tmp/pwned)",
    "`id`",
    "double \"quoted\"",
    "it's a 'single' one",
    "mix '$(a)' \"`b`\" ; c",
];

/// Value of `key` in the rendered `[agents:vars]` section
fn var<'a>(inventory: &'a str, key: &str) -> &'a str {
    inventory
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
        .unwrap()
}

#[test]
fn test_render_layout() {
    let inventory = render_inventory(&request(&["h1", "h2.example.com"])).unwrap();
    let lines: Vec<&str> = inventory.lines().collect();

    assert_eq!(lines[0], "[agents]");
    assert_eq!(lines[1], "'h1'");
    assert_eq!(lines[2], "'h2.example.com'");
    assert_eq!(lines[3], "");
    assert_eq!(lines[4], "[agents:vars]");
    assert_eq!(var(&inventory, "ansible_user"), "'svc_nessus'");
    assert_eq!(var(&inventory, "ansible_become_method"), "sudo");
    assert_eq!(var(&inventory, "activation_key"), "'ak-123'");
    assert_eq!(var(&inventory, "manager_port"), "8834");
    assert_eq!(var(&inventory, "remove_rapid7"), "true");
}

#[test]
fn test_quoted_values_split_back_to_the_original() {
    for value in TRICKY_VALUES {
        let mut req = request(&["h1"]);
        req.credential.password = SecretString::from(value.to_string());
        req.groups = value.to_string();

        let inventory = render_inventory(&req).unwrap();
        for key in ["ansible_password", "groups"] {
            let words = shell_words::split(var(&inventory, key)).unwrap();
            assert_eq!(words, vec![value.to_string()], "key {key}");
        }
    }
}

#[test]
fn test_quoted_values_survive_shell_interpolation() {
    for value in TRICKY_VALUES {
        let mut req = request(&["h1"]);
        req.credential.activation_key = SecretString::from(value.to_string());

        let inventory = render_inventory(&req).unwrap();
        let quoted = var(&inventory, "activation_key");

        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("printf '%s' {quoted}"))
            .output()
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8(output.stdout).unwrap(), value);
    }
}

#[test]
fn test_line_breaks_rejected() {
    let mut req = request(&["h1"]);
    req.groups = "a\n[evil]".to_string();
    assert!(matches!(
        render_inventory(&req),
        Err(DeployerError::ValidationError(_))
    ));
}

#[test]
fn test_payload_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let payload = InventoryBuilder::new(Some(dir.path().to_path_buf()))
        .build(&request(&["h1"]))
        .unwrap();

    let mode = std::fs::metadata(payload.path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    let content = std::fs::read_to_string(payload.path()).unwrap();
    assert!(content.contains("ansible_password='hunter2'"));

    let path = payload.path().to_path_buf();
    payload.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_incomplete_request_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let builder = InventoryBuilder::new(Some(dir.path().to_path_buf()));

    let mut req = request(&["h1"]);
    req.credential.password = SecretString::from(String::new());
    assert!(matches!(
        builder.build(&req),
        Err(DeployerError::ValidationError(_))
    ));

    let mut req = request(&["h1"]);
    req.credential.activation_key = SecretString::from(String::new());
    assert!(builder.build(&req).is_err());

    let req = request(&[]);
    assert!(builder.build(&req).is_err());

    assert!(leftover_inventories(dir.path()).is_empty());
}
