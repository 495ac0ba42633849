#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use spatialpair_tools::services::{
    CancellationToken, CommandOutput, CommandRunner, ServiceCommand, ServiceError,
};

/// Stands in for the external tools: records every command and writes the
/// files each tool would produce.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<ServiceCommand>>,
    /// `(program name, exit code)` to fail on.
    pub fail: Option<(String, i32)>,
    /// Program names `locate` pretends are not installed.
    pub missing: Vec<String>,
    /// Cancel this token after the first alignment call.
    pub cancel_after_align: Option<CancellationToken>,
    /// Program names that exit 0 without writing their output.
    pub silent: Vec<String>,
    /// Program that dies from a terminal interrupt, cancelling the token.
    pub interrupted: Option<(String, CancellationToken)>,
}

impl FakeRunner {
    pub fn failing(program: &str, code: i32) -> Self {
        Self {
            fail: Some((program.to_string(), code)),
            ..Self::default()
        }
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.program_name())
            .collect()
    }

    pub fn count(&self, program: &str) -> usize {
        self.programs().iter().filter(|p| *p == program).count()
    }
}

fn touch(path: &str) {
    fs::write(path, b"fake").unwrap();
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        cmd: &ServiceCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, ServiceError> {
        if cancel.is_cancelled() {
            return Err(ServiceError::Cancelled);
        }
        self.calls.lock().unwrap().push(cmd.clone());
        let program = cmd.program_name();
        if let Some((name, code)) = &self.fail {
            if *name == program {
                return Ok(CommandOutput {
                    code: Some(*code),
                    stdout: String::new(),
                    stderr: format!("{program} refused"),
                });
            }
        }
        if let Some((name, token)) = &self.interrupted {
            if *name == program {
                token.cancel();
                return Ok(CommandOutput {
                    code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
        }
        if self.silent.contains(&program) {
            return Ok(CommandOutput {
                code: Some(0),
                ..CommandOutput::default()
            });
        }
        let last = cmd.args.last().cloned().unwrap_or_default();
        let mut stdout = String::new();
        match program.as_str() {
            "ffmpeg" | "StereoAutoAlign" => touch(&last),
            "spatialPhotoTool" => touch(&Path::new(&last).with_extension("heic").to_string_lossy()),
            "jpegtran" => {
                let at = cmd.args.iter().position(|a| a == "-outfile").unwrap();
                touch(&cmd.args[at + 1]);
            }
            "exiftool" if cmd.args.iter().any(|a| a == "-Orientation#") => {
                stdout.push_str("6\n");
            }
            _ => {}
        }
        if program == "StereoAutoAlign" {
            if let Some(token) = &self.cancel_after_align {
                token.cancel();
            }
        }
        Ok(CommandOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }

    fn locate(&self, program: &Path) -> Option<PathBuf> {
        let name = program.file_name()?.to_string_lossy().into_owned();
        (!self.missing.contains(&name)).then(|| PathBuf::from("/usr/bin").join(name))
    }
}

pub fn capture_name(index: u32) -> String {
    format!("IMG20240501{:06}-{index:04}.jpg", 120000 + index)
}

/// Write fake captures named `IMG<YYYYMMDD>-<HHMMSS>.jpg` into `dir`.
pub fn write_stamped(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), b"jpeg").unwrap();
    }
}

/// Write fake captures with the given indices into `dir`.
pub fn write_captures(dir: &Path, indices: &[u32]) {
    fs::create_dir_all(dir).unwrap();
    for &index in indices {
        fs::write(dir.join(capture_name(index)), b"jpeg").unwrap();
    }
}
