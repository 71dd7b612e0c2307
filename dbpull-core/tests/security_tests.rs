//! Security tests for credential protection.
//!
//! The remote database password is read from the production host and must
//! reach the remote shell intact, but never logs, `Debug` output, plans or
//! error messages.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::uninlined_format_args)]

mod support;

use dbpull_core::{CommandOutput, CredentialDiscovery, Pipeline};
use support::{FakeSession, RecordingDatabase, SENSITIVE_PASSWORD, config, credential_output};
use tempfile::TempDir;

#[tokio::test]
async fn test_password_reaches_remote_shell_but_not_redacted_text() {
    let project = TempDir::new().unwrap();
    let config = config(project.path(), &[]);
    let discovery = CredentialDiscovery::default();
    let session = FakeSession::bitrix();

    Pipeline::new(&config, &discovery)
        .run(&session, &RecordingDatabase::default())
        .await
        .unwrap();

    let rendered = session.rendered_commands();
    let dumps: Vec<_> = rendered.iter().filter(|c| c.contains("mysqldump")).collect();
    assert_eq!(dumps.len(), 2);
    for cmd in dumps {
        assert!(cmd.contains(&format!("--password={}", SENSITIVE_PASSWORD)));
    }

    for cmd in session.redacted_commands() {
        assert!(
            !cmd.contains(SENSITIVE_PASSWORD),
            "Password leaked in redacted command: {}",
            cmd
        );
    }
}

#[tokio::test]
async fn test_no_password_in_failure_or_report() {
    let project = TempDir::new().unwrap();
    let config = config(project.path(), &[]);
    let discovery = CredentialDiscovery::default();

    let session = FakeSession {
        data: CommandOutput::failed(2, "mysqldump: Couldn't execute 'SHOW TABLES'"),
        ..FakeSession::bitrix()
    };
    let failure = Pipeline::new(&config, &discovery)
        .run(&session, &RecordingDatabase::default())
        .await
        .unwrap_err();

    for text in [failure.to_string(), format!("{:?}", failure)] {
        assert!(
            !text.contains(SENSITIVE_PASSWORD),
            "Password leaked in failure: {}",
            text
        );
    }

    let session = FakeSession::bitrix();
    let report = Pipeline::new(&config, &discovery)
        .run(&session, &RecordingDatabase::default())
        .await
        .unwrap();
    let debug = format!("{:?}", report);
    assert!(!debug.contains(SENSITIVE_PASSWORD));
}

#[tokio::test]
async fn test_plan_is_redacted() {
    let project = TempDir::new().unwrap();
    let config = config(project.path(), &["sessions"]);
    let discovery = CredentialDiscovery::default();
    let session = FakeSession::bitrix();

    let plan = Pipeline::new(&config, &discovery)
        .plan(&session)
        .await
        .unwrap();

    let json = serde_json::to_string(&plan).unwrap();
    assert!(!json.contains(SENSITIVE_PASSWORD));
    assert!(json.contains("--password=****"));
}

#[tokio::test]
async fn test_hostile_password_stays_one_shell_word() {
    let project = TempDir::new().unwrap();
    let config = config(project.path(), &[]);
    let discovery = CredentialDiscovery::default();
    let session = FakeSession {
        extraction: CommandOutput::ok(credential_output("x';touch${IFS}/tmp/pwned;'")),
        ..FakeSession::bitrix()
    };

    Pipeline::new(&config, &discovery)
        .run(&session, &RecordingDatabase::default())
        .await
        .unwrap();

    let schema = session
        .rendered_commands()
        .into_iter()
        .find(|c| c.contains("--no-data"))
        .unwrap();
    assert!(schema.contains(r"'--password=x'\'';touch${IFS}/tmp/pwned;'\'''"));
}
