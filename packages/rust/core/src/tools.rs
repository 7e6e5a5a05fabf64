//! Command lines for the external tools.

use std::fmt;

use tracedeck_shared::{App, ToolsConfig};

/// Exit status of `timeout` when the time limit expired.
pub const TIMEOUT_EXPIRED: i32 = 124;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
}

impl Invocation {
    fn new<I, S>(command: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Builds tool invocations for one app, honouring its overrides.
pub struct Toolbox<'a> {
    tools: &'a ToolsConfig,
    app: &'a App,
}

impl<'a> Toolbox<'a> {
    pub fn new(tools: &'a ToolsConfig, app: &'a App) -> Self {
        Self { tools, app }
    }

    fn apitrace(&self) -> &str {
        self.app.api_trace.as_deref().unwrap_or(&self.tools.apitrace)
    }

    fn glretrace(&self) -> &str {
        self.app.retrace.as_deref().unwrap_or(&self.tools.glretrace)
    }

    /// `/bin/sh <build script>`
    pub fn build(&self) -> Invocation {
        Invocation::new(&self.tools.shell, [self.app.build_script.as_str()])
    }

    /// `timeout <N>s apitrace trace ./<exe>`
    pub fn trace(&self) -> Invocation {
        let exe = &self.app.executable;
        let exe = if exe.starts_with('/') || exe.starts_with("./") {
            exe.clone()
        } else {
            format!("./{exe}")
        };
        Invocation::new(
            &self.tools.timeout,
            [
                format!("{}s", self.app.timeout_secs),
                self.apitrace().to_string(),
                "trace".to_string(),
                exe,
            ],
        )
    }

    /// `apitrace dump -v --color=never <trace>`
    pub fn dump(&self, trace_file: &str) -> Invocation {
        Invocation::new(
            self.apitrace(),
            ["dump", "-v", "--color=never", trace_file],
        )
    }

    /// `apitrace dump-images -m --calls=<call> <trace>`
    pub fn dump_images(&self, trace_file: &str, call_id: &str) -> Invocation {
        Invocation::new(
            self.apitrace(),
            [
                "dump-images".to_string(),
                "-m".to_string(),
                format!("--calls={call_id}"),
                trace_file.to_string(),
            ],
        )
    }

    /// `glretrace -v --sb --D=<call> --dump-format=json <trace>`
    pub fn retrace(&self, trace_file: &str, call_id: &str) -> Invocation {
        Invocation::new(
            self.glretrace(),
            [
                "-v".to_string(),
                "--sb".to_string(),
                format!("--D={call_id}"),
                "--dump-format=json".to_string(),
                trace_file.to_string(),
            ],
        )
    }
}
