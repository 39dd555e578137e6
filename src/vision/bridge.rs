//! External PaddleOCR bridge
//!
//! Runs a configured program once per image and reads its JSON result from
//! stdout. Either PaddleOCR result shape is accepted.

use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::device::Device;
use super::engine::{EngineFactory, OcrEngine};
use super::raw::RawResult;
use crate::config::CommandConfig;
use crate::error::OcrError;

const DEVICE_PLACEHOLDER: &str = "{device}";
const IMAGE_PLACEHOLDER: &str = "{image}";

fn substitute(args: &[String], device: Device, image: Option<&Path>) -> Vec<String> {
    let device = device.to_string();
    let image = image.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();

    args.iter()
        .map(|arg| arg.replace(DEVICE_PLACEHOLDER, &device).replace(IMAGE_PLACEHOLDER, &image))
        .collect()
}

/// Builds [`CommandEngine`]s after checking the program works on the device
pub struct CommandFactory {
    config: CommandConfig,
}

impl CommandFactory {
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for CommandFactory {
    fn build(&self, device: Device) -> Result<Box<dyn OcrEngine>> {
        let program = &self.config.program;

        if self.config.check_args.is_empty() {
            if let Device::Gpu(id) = device {
                anyhow::bail!(
                    "GPU {} unverified for {:?}; configure engine.command.check_args to probe it",
                    id,
                    program
                );
            }
            // only prove the program exists; its exit status is irrelevant
            Command::new(program)
                .arg("--help")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .with_context(|| format!("Failed to run OCR program {:?}", program))?;
        } else {
            let args = substitute(&self.config.check_args, device, None);
            let output = Command::new(program)
                .args(&args)
                .output()
                .with_context(|| format!("Failed to run OCR program {:?}", program))?;

            if !output.status.success() {
                anyhow::bail!(
                    "OCR program check failed on {} ({}): {}",
                    device,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }

        info!("External OCR program {:?} ready on {}", program, device);
        Ok(Box::new(CommandEngine {
            program: program.clone(),
            args: self.config.args.clone(),
            device,
        }))
    }
}

/// One process per image
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    device: Device,
}

impl OcrEngine for CommandEngine {
    fn ocr(&mut self, image_path: &Path) -> Result<RawResult, OcrError> {
        let args = substitute(&self.args, self.device, Some(image_path));
        debug!("Running {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| OcrError::engine(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(OcrError::engine(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        RawResult::from_json(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::vision::DeviceSelector;

    fn shell(script: &str) -> CommandConfig {
        CommandConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "ocr".to_string(), "{image}".to_string(), "{device}".to_string()],
            check_args: Vec::new(),
        }
    }

    #[test]
    fn test_substitute_placeholders() {
        let args = vec!["--device={device}".to_string(), "{image}".to_string(), "plain".to_string()];

        let substituted = substitute(&args, Device::Gpu(1), Some(Path::new("/tmp/a.png")));
        assert_eq!(substituted, vec!["--device=gpu:1", "/tmp/a.png", "plain"]);

        let substituted = substitute(&args, Device::Cpu, None);
        assert_eq!(substituted, vec!["--device=cpu", "", "plain"]);
    }

    #[test]
    fn test_structured_output() {
        let factory = CommandFactory::new(shell(
            r#"echo '[{"rec_texts":["Total"],"rec_polys":[[[0,0],[9,0],[9,9],[0,9]]],"rec_scores":[0.9]}]'"#,
        ));
        let mut engine = factory.build(Device::Cpu).unwrap();

        match engine.ocr(Path::new("invoice.png")).unwrap() {
            RawResult::StructuredArrays(pages) => assert_eq!(pages.len(), 1),
            other => panic!("expected structured arrays, got {:?}", other),
        }
    }

    #[test]
    fn test_arguments_reach_program() {
        // echo the substituted image path and device back as a legacy line
        let mut config = shell(r#"printf '[[[[[0,0],[1,0],[1,1],[0,1]],["%s %s",1.0]]]]' "$1" "$2""#);
        config.check_args = vec!["-c".to_string(), "true".to_string()];
        let factory = CommandFactory::new(config);
        let mut engine = factory.build(Device::Gpu(0)).unwrap();

        let raw = engine.ocr(Path::new("/tmp/scan.jpg")).unwrap();
        let RawResult::LegacyLines(pages) = raw else {
            panic!("expected legacy lines");
        };
        let line = &pages[0].as_ref().unwrap()[0];
        assert_eq!(line[1][0], "/tmp/scan.jpg gpu:0");
    }

    #[test]
    fn test_failed_run_is_engine_error() {
        let factory = CommandFactory::new(shell("echo 'cannot identify image file' >&2; exit 1"));
        let mut engine = factory.build(Device::Cpu).unwrap();

        match engine.ocr(Path::new("broken.png")) {
            Err(OcrError::Engine { reason }) => assert!(reason.contains("cannot identify image file")),
            other => panic!("expected engine error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_json_output_is_unsupported() {
        let factory = CommandFactory::new(shell("echo 'Invoice #12345'"));
        let mut engine = factory.build(Device::Cpu).unwrap();

        assert!(matches!(
            engine.ocr(Path::new("a.png")),
            Err(OcrError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_check_failure_rejects_device() {
        let mut config = shell("echo '[]'");
        config.check_args = vec!["-c".to_string(), r#"[ "$0" = "cpu" ]"#.to_string(), "{device}".to_string()];
        let factory = CommandFactory::new(config);

        assert!(factory.build(Device::Gpu(0)).is_err());
        assert!(factory.build(Device::Cpu).is_ok());
    }

    #[test]
    fn test_unchecked_gpu_falls_back_to_cpu() {
        let factory = CommandFactory::new(shell("echo '[]'"));
        assert!(factory.build(Device::Gpu(0)).is_err());

        let selector = DeviceSelector::new(Box::new(factory), Some(0));
        let (readiness, adapter) = selector.initialize();

        assert_eq!(readiness.device_label(), "cpu");
        assert!(!readiness.using_gpu());
        assert!(adapter.readiness().initialized());
    }

    #[test]
    fn test_missing_program_fails_construction() {
        let factory = CommandFactory::new(CommandConfig {
            program: "/nonexistent/paddleocr".to_string(),
            ..CommandConfig::default()
        });

        assert!(factory.build(Device::Cpu).is_err());
    }
}
