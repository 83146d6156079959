// src/sys/actions.rs

use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::info;

use crate::error::DeployError;
use crate::sys::props::{CONFIG_FILE_VAR, ConnectionProperties};
use crate::sys::traits::ActionDeployer;

/// Deploys packaged serverless actions by shelling out to the runtime CLI.
pub struct RuntimeCliDeployer {
    program: String,
    base_args: Vec<String>,
}

impl RuntimeCliDeployer {
    /// `<program> runtime deploy ... -m <manifest>`
    pub fn new(program: impl Into<String>) -> Self {
        Self::with_command(program, ["runtime", "deploy"])
    }

    pub fn with_command<I, S>(program: impl Into<String>, base_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            base_args: base_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Redacts the auth key and any `user:pass@` URL credentials from CLI output.
    fn scrub(output: &str, props: &ConnectionProperties) -> String {
        let mut cleaned = output.to_string();
        if let Some(auth) = props.auth_key.as_deref().filter(|a| !a.is_empty()) {
            cleaned = cleaned.replace(auth, "[REDACTED]");
        }
        match regex::Regex::new(r"(://)([^/@\s]+)@") {
            Ok(re) => re.replace_all(&cleaned, "$1[REDACTED]@").to_string(),
            Err(_) => cleaned,
        }
    }
}

impl Default for RuntimeCliDeployer {
    fn default() -> Self {
        Self::new("aio")
    }
}

#[async_trait]
impl ActionDeployer for RuntimeCliDeployer {
    async fn deploy(
        &self,
        manifest: &Path,
        props: &ConnectionProperties,
        extra_args: &[String],
    ) -> Result<(), DeployError> {
        // 🛡️ Scoped identity: the properties file lives only as long as `props_file`
        // and is handed to the child alone. Dropped (and deleted) on every exit path.
        let mut props_file = NamedTempFile::new().map_err(|e| {
            DeployError::ActionDeploy(format!("cannot create properties file: {}", e))
        })?;
        props_file
            .write_all(props.to_properties_file().as_bytes())
            .map_err(|e| DeployError::ActionDeploy(format!("cannot write properties file: {}", e)))?;

        info!("Deploying actions from {}", manifest.display());
        let output = Command::new(&self.program)
            .env(CONFIG_FILE_VAR, props_file.path())
            .args(&self.base_args)
            .args(extra_args)
            .arg("-m")
            .arg(manifest)
            .output()
            .await
            .map_err(|e| DeployError::ActionDeploy(format!("failed to spawn {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeployError::ActionDeploy(format!(
                "{} exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                Self::scrub(stderr.trim(), props)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> ConnectionProperties {
        ConnectionProperties {
            api_host: Some("https://h.test".into()),
            namespace: Some("ns".into()),
            auth_key: Some("uuid:supersecret".into()),
            gateway_access_token: None,
        }
    }

    #[test]
    fn scrub_hides_auth_and_url_credentials() {
        let out = RuntimeCliDeployer::scrub(
            "bad auth uuid:supersecret for https://user:pw@h.test/api",
            &props(),
        );
        assert!(!out.contains("supersecret"));
        assert!(!out.contains("user:pw"));
        assert!(out.contains("https://[REDACTED]@h.test"));
    }

    #[tokio::test]
    async fn missing_program_is_action_deploy_error() {
        let deployer = RuntimeCliDeployer::new("definitely-not-a-real-cli-binary");
        let err = deployer
            .deploy(Path::new("manifest.yml"), &props(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::ActionDeploy(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_sees_scoped_properties_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-cli.sh");
        let seen = dir.path().join("seen.txt");
        std::fs::write(
            &script,
            format!(
                "cat \"$WSK_CONFIG_FILE\" > '{0}'\necho \"$@\" >> '{0}'\n",
                seen.display()
            ),
        )
        .unwrap();

        let deployer = RuntimeCliDeployer::with_command(
            "sh",
            [script.to_str().unwrap(), "runtime", "deploy"],
        );
        deployer
            .deploy(Path::new("manifest.yml"), &props(), &["--force".to_string()])
            .await
            .unwrap();

        let captured = std::fs::read_to_string(&seen).unwrap();
        assert!(captured.contains("AUTH=uuid:supersecret"));
        assert!(captured.contains("NAMESPACE=ns"));
        assert!(captured.contains("runtime deploy --force -m manifest.yml"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_cli_reports_scrubbed_stderr() {
        let err = RuntimeCliDeployer::with_command(
            "sh",
            ["-c", "echo \"denied for uuid:supersecret\" >&2; exit 3", "fake-cli"],
        )
        .deploy(Path::new("manifest.yml"), &props(), &[])
        .await
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exited with code 3"));
        assert!(!msg.contains("supersecret"));
    }
}
