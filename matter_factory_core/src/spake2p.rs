//! SPAKE2+ verifier generation, delegated to the `spake2p` tool.

use crate::{tool, ProvisionError};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::*;

/// Iteration count ceiling handed to the generator.
pub const ITERATION_COUNT_MAX: u32 = 1000;
/// Salt length ceiling handed to the generator.
pub const SALT_LEN_MAX: u32 = 24;

const ITERATION_COUNT_HEADER: &str = "Iteration Count";
const SALT_HEADER: &str = "Salt";
const VERIFIER_HEADER: &str = "Verifier";

/// The values the generator printed. Salt and verifier are kept as the base64
/// text the tool emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spake2pParams {
    pub iteration_count: u32,
    pub salt: String,
    pub verifier: String,
}

pub trait VerifierGenerator {
    fn generate(&self, passcode: u32) -> Result<Spake2pParams, ProvisionError>;
}

#[derive(Debug, Clone)]
pub struct Spake2pTool {
    pub path: PathBuf,
    pub iteration_count: u32,
    pub salt_len: u32,
    pub timeout: Duration,
}

impl Spake2pTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            iteration_count: ITERATION_COUNT_MAX,
            salt_len: SALT_LEN_MAX,
            timeout: tool::DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

impl VerifierGenerator for Spake2pTool {
    fn generate(&self, passcode: u32) -> Result<Spake2pParams, ProvisionError> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("gen-verifier")
            .arg("--iteration-count")
            .arg(self.iteration_count.to_string())
            .arg("--salt-len")
            .arg(self.salt_len.to_string())
            .arg("--pin-code")
            .arg(passcode.to_string())
            .arg("--out")
            .arg("-");

        let output = tool::run(cmd, self.timeout)?;
        let stdout = String::from_utf8(output.stdout).map_err(|_| {
            ProvisionError::external_tool(self.name(), "output is not valid UTF-8")
        })?;

        let params =
            parse_output(&stdout).map_err(|detail| ProvisionError::external_tool(self.name(), detail))?;
        debug!(
            iteration_count = params.iteration_count,
            salt_len = params.salt.len(),
            "generated spake2p verifier"
        );
        Ok(params)
    }
}

/// Parses the two line `header\nvalues` CSV the generator writes to stdout.
pub fn parse_output(stdout: &str) -> Result<Spake2pParams, String> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let [header, values] = lines.as_slice() else {
        return Err(format!(
            "expected a header line and a value line, got {} lines",
            lines.len()
        ));
    };

    let header: Vec<&str> = header.split(',').map(str::trim).collect();
    let values: Vec<&str> = values.split(',').map(str::trim).collect();
    if header.len() != values.len() {
        return Err(format!(
            "header has {} columns but values have {}",
            header.len(),
            values.len()
        ));
    }

    let column = |name: &str| -> Result<&str, String> {
        header
            .iter()
            .position(|h| *h == name)
            .map(|i| values[i])
            .filter(|v| !v.is_empty())
            .ok_or_else(|| format!("missing '{}' column", name))
    };

    let iteration_count = column(ITERATION_COUNT_HEADER)?
        .parse::<u32>()
        .map_err(|e| format!("bad iteration count: {}", e))?;

    Ok(Spake2pParams {
        iteration_count,
        salt: column(SALT_HEADER)?.to_string(),
        verifier: column(VERIFIER_HEADER)?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOOL_OUTPUT: &str = "Index,PIN Code,Iteration Count,Salt,Verifier\n\
        0,20202021,1000,U1BBS0UyUCBLZXkgU2FsdA==,uWFwqugDNGiEck/po7KHwwMwwqZgN10XuyBajPGuyzUEV/iree4lOrao5GuwnlQ65CJzbeUB49s31EH+NEkg0JVI5MGCQGMMT/SRPFNRODm3wH/MBiehuFc6FJ/NH6Rmzw==\n";

    #[test]
    fn parses_generator_output() {
        let params = parse_output(TOOL_OUTPUT).unwrap();
        assert_eq!(params.iteration_count, 1000);
        assert_eq!(params.salt, "U1BBS0UyUCBLZXkgU2FsdA==");
        assert!(params.verifier.starts_with("uWFwqug"));
    }

    #[test]
    fn rejects_single_line() {
        assert!(parse_output("Index,PIN Code,Iteration Count,Salt,Verifier\n").is_err());
    }

    #[test]
    fn rejects_extra_lines() {
        let output = format!("{}1,20202021,1000,a,b\n", TOOL_OUTPUT);
        assert!(parse_output(&output).is_err());
    }

    #[test]
    fn rejects_column_mismatch() {
        assert!(parse_output("Iteration Count,Salt,Verifier\n1000,abc\n").is_err());
    }

    #[test]
    fn rejects_missing_verifier() {
        assert!(parse_output("Iteration Count,Salt\n1000,abc\n").is_err());
    }

    #[test]
    fn rejects_non_numeric_iteration_count() {
        assert!(parse_output("Iteration Count,Salt,Verifier\nlots,abc,def\n").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn invokes_tool_with_expected_arguments() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("spake2p");
        // echo the arguments back inside the salt column so we can check them
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'Index,PIN Code,Iteration Count,Salt,Verifier'\necho \"0,$7,$3,$1 $5,dmVyaWZpZXI=\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let params = Spake2pTool::new(&script).generate(20202021).unwrap();
        assert_eq!(params.iteration_count, 1000);
        assert_eq!(params.salt, "gen-verifier 24");
        assert_eq!(params.verifier, "dmVyaWZpZXI=");
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_is_external_tool_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("spake2p");
        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(
            Spake2pTool::new(&script).generate(20202021),
            Err(ProvisionError::ExternalTool { .. })
        ));
    }
}
