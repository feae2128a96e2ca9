//! File-backed input sampler.
//!
//! The platform exports the current button/switch bitmask at a well-known
//! path; reading it is inherently non-consuming, so the guard never steals
//! input from other consumers. Any read or parse failure surfaces as a
//! `SampleError`, which callers map to the conservative "switches
//! disengaged" observation.

use std::path::PathBuf;

use sleepguard_core::{InputSampler, RawInput, SampleError};

pub struct FileInputSampler {
    path: PathBuf,
}

impl FileInputSampler {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl InputSampler for FileInputSampler {
    fn sample(&self) -> Result<RawInput, SampleError> {
        let content = fs_err::read_to_string(&self.path)
            .map_err(|err| SampleError(format!("{}: {}", self.path.display(), err)))?;
        let bitmask = parse_bitmask(content.trim()).ok_or_else(|| {
            SampleError(format!(
                "{}: not a bitmask: {:?}",
                self.path.display(),
                content.trim()
            ))
        })?;
        Ok(RawInput::new(bitmask))
    }
}

/// Accepts hex with a `0x` prefix or plain decimal.
fn parse_bitmask(value: &str) -> Option<u32> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sleepguard_core::input::buttons;

    fn sampler_with_content(content: &str) -> (tempfile::TempDir, FileInputSampler) {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("input-state");
        std::fs::write(&path, content).expect("write input state");
        (temp_dir, FileInputSampler::new(path))
    }

    #[test]
    fn reads_hex_bitmask() {
        let (_dir, sampler) = sampler_with_content("0x20010000\n");
        let raw = sampler.sample().expect("sample");
        assert!(raw.engaged(buttons::HOME));
        assert!(raw.engaged(buttons::HOLD));
    }

    #[test]
    fn reads_decimal_bitmask() {
        let (_dir, sampler) = sampler_with_content("8\n");
        let raw = sampler.sample().expect("sample");
        assert!(raw.engaged(buttons::START));
    }

    #[test]
    fn missing_file_is_a_sample_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let sampler = FileInputSampler::new(temp_dir.path().join("absent"));
        assert!(sampler.sample().is_err());
    }

    #[test]
    fn garbage_content_is_a_sample_error() {
        let (_dir, sampler) = sampler_with_content("not-a-number");
        assert!(sampler.sample().is_err());
    }

    #[test]
    fn parse_bitmask_variants() {
        assert_eq!(parse_bitmask("0x10"), Some(16));
        assert_eq!(parse_bitmask("0X10"), Some(16));
        assert_eq!(parse_bitmask("42"), Some(42));
        assert_eq!(parse_bitmask(""), None);
        assert_eq!(parse_bitmask("0xzz"), None);
    }
}
