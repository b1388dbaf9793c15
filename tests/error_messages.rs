//! Unit-level tests for user-facing error message rendering.

use skylift::test_support::FakeApiError;
use skylift::{ExecutorError, RequestError, SessionError};

#[test]
fn retries_exhausted_names_method_and_url() {
    let error = SessionError::RetriesExhausted {
        method: String::from("PUT"),
        url: String::from("https://management.example/acct/modules/m?api-version=v"),
    };
    assert_eq!(
        error.to_string(),
        "failed to send HTTP request - reached maximum retries. Method - 'PUT', \
         url - 'https://management.example/acct/modules/m?api-version=v'"
    );
}

#[test]
fn package_not_found_names_the_package() {
    let error = SessionError::PackageNotFound {
        name: String::from("pip"),
    };
    assert_eq!(
        error.to_string(),
        "failed to delete package 'pip'. Package does not exist"
    );
}

#[test]
fn account_not_found_names_the_account() {
    let error = SessionError::AccountNotFound {
        account_id: String::from("/subscriptions/s/x"),
    };
    assert_eq!(
        error.to_string(),
        "automation account does not exist - '/subscriptions/s/x'"
    );
}

#[test]
fn import_failed_carries_the_service_message() {
    let error: ExecutorError<FakeApiError> = ExecutorError::ImportFailed {
        name: String::from("pkg"),
        message: String::from("wheel metadata invalid"),
    };
    assert_eq!(
        error.to_string(),
        "import of package 'pkg' failed: wheel metadata invalid"
    );
}

#[test]
fn import_timeout_reports_the_budget() {
    let error: ExecutorError<FakeApiError> = ExecutorError::ImportTimeout {
        name: String::from("pkg"),
        seconds: 300,
    };
    assert_eq!(
        error.to_string(),
        "import of package 'pkg' did not finish within 300 seconds"
    );
}

#[test]
fn unsupported_artifact_reports_the_extension() {
    let error = RequestError::UnsupportedArtifact {
        extension: String::from("ps1"),
    };
    assert_eq!(
        error.to_string(),
        "artifact extension 'ps1' is not supported (expected .zip or .whl)"
    );
}
