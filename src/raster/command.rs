//! External-process backend.
//!
//! Wraps any command-line renderer that reads source on stdin and writes an
//! image on stdout, e.g. `mmdc -i - -o - -e png` for Mermaid diagrams or
//! `rsvg-convert -f png` for SVG. Non-zero exit status is a render failure;
//! the first lines of stderr become the diagnostic shown inline.

use super::{BackendImage, Rasterizer};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_LINES: usize = 8;

/// Runs `program args…`, piping content through it.
#[derive(Debug, Clone)]
pub struct CommandRasterizer {
    program: String,
    args: Vec<String>,
}

impl CommandRasterizer {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a command line on whitespace: `"rsvg-convert -f png"`.
    ///
    /// Returns `None` for an empty command line.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Rasterizer for CommandRasterizer {
    async fn render(&self, content: &str) -> Result<BackendImage, String> {
        debug!("Spawning {} {:?}", self.program, self.args);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("cannot start '{}': {}", self.program, e))?;

        // Feed stdin while stdout is drained; a streaming converter would
        // otherwise block on a full pipe.
        let stdin = child.stdin.take();
        let input = content.as_bytes().to_vec();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, finished) = tokio::join!(feed, child.wait_with_output());

        let output =
            finished.map_err(|e| format!("'{}' did not finish: {}", self.program, e))?;
        if let Err(e) = fed {
            // A renderer may exit before reading all input; only its status matters then.
            if output.status.success() {
                debug!("'{}' closed stdin early: {}", self.program, e);
            } else {
                warn!("cannot write to '{}': {}", self.program, e);
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail: Vec<&str> = stderr.lines().take(STDERR_LINES).collect();
            return Err(if detail.is_empty() {
                format!("'{}' exited with {}", self.program, output.status)
            } else {
                detail.join("\n")
            });
        }

        // Dimensions are read from the bytes by the adapter.
        Ok(BackendImage {
            base64: STANDARD.encode(&output.stdout),
            width: 0,
            height: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_line() {
        let r = CommandRasterizer::from_command_line("rsvg-convert -f png").unwrap();
        assert_eq!(r.program(), "rsvg-convert");
        assert_eq!(r.args, vec!["-f", "png"]);
        assert!(CommandRasterizer::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn missing_program_is_a_render_failure() {
        let r = CommandRasterizer::new("docrender-definitely-not-installed", Vec::<String>::new());
        let err = r.render("graph TD").await.unwrap_err();
        assert!(err.contains("cannot start"), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let r = CommandRasterizer::new("sh", ["-c", "echo 'syntax error at 1:3' >&2; exit 2"]);
        let err = r.render("x").await.unwrap_err();
        assert!(err.contains("syntax error"), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_becomes_base64_payload() {
        let r = CommandRasterizer::new("cat", Vec::<String>::new());
        let img = r.render("abc").await.unwrap();
        assert_eq!(img.base64, STANDARD.encode(b"abc"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn large_input_does_not_stall_on_full_pipes() {
        let r = CommandRasterizer::new("cat", Vec::<String>::new());
        let content = "x".repeat(512 * 1024);
        let img = tokio::time::timeout(std::time::Duration::from_secs(10), r.render(&content))
            .await
            .expect("cat finished")
            .unwrap();
        assert_eq!(STANDARD.decode(img.base64).unwrap().len(), content.len());
    }
}
