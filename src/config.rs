use crate::audio::MIN_CHUNK_SIZE_CHARS;
use crate::error::{Result, ScriptcastError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Audio container produced by the speech service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
    Opus,
    Pcm,
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            "opus" => Ok(AudioFormat::Opus),
            "pcm" => Ok(AudioFormat::Pcm),
            _ => Err(format!(
                "Unknown audio format: {}. Use 'mp3', 'wav', 'opus', or 'pcm'",
                s
            )),
        }
    }
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Opus => "opus",
            AudioFormat::Pcm => "pcm",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gemini_api_key: Option<String>,
    pub fish_api_key: Option<String>,
    pub text_model: String,
    pub gemini_base_url: String,
    pub fish_base_url: String,
    pub fish_model: String,
    pub output_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub chunk_size_chars: usize,
    pub audio_format: AudioFormat,
    pub mp3_bitrate: u32,
    pub voice_id: Option<String>,
    pub bind: String,
    pub job_max_age_minutes: u64,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            fish_api_key: None,
            text_model: "gemini-2.0-flash".to_string(),
            gemini_base_url: "https://generativelanguage.googleapis.com".to_string(),
            fish_base_url: "https://api.fish.audio".to_string(),
            fish_model: "speech-1.6".to_string(),
            output_dir: PathBuf::from("output"),
            scripts_dir: PathBuf::from("scripts"),
            chunk_size_chars: 4000,
            audio_format: AudioFormat::default(),
            mp3_bitrate: 128,
            voice_id: None,
            bind: "127.0.0.1:3000".to_string(),
            job_max_age_minutes: 30,
            sweep_interval_secs: 300,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    ScriptcastError::Config(format!(
                        "Failed to parse {}: {}",
                        config_path.display(),
                        e
                    ))
                })?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("FISH_API_KEY") {
            self.fish_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("SCRIPTCAST_TEXT_MODEL") {
            self.text_model = model;
        }
        if let Ok(dir) = std::env::var("SCRIPTCAST_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SCRIPTCAST_SCRIPTS_DIR") {
            self.scripts_dir = PathBuf::from(dir);
        }
        if let Ok(size) = std::env::var("SCRIPTCAST_CHUNK_SIZE") {
            if let Ok(s) = size.parse() {
                self.chunk_size_chars = s;
            }
        }
        if let Ok(format) = std::env::var("SCRIPTCAST_AUDIO_FORMAT") {
            if let Ok(f) = format.parse() {
                self.audio_format = f;
            }
        }
        if let Ok(bind) = std::env::var("SCRIPTCAST_BIND") {
            self.bind = bind;
        }
        if let Ok(voice) = std::env::var("SCRIPTCAST_VOICE_ID") {
            if !voice.trim().is_empty() {
                self.voice_id = Some(voice);
            }
        }
    }

    /// Check that credentials and numeric settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.gemini_api_key.is_none() {
            return Err(ScriptcastError::Config(
                "GEMINI_API_KEY not set. Get one at https://aistudio.google.com/apikey"
                    .to_string(),
            ));
        }
        if self.fish_api_key.is_none() {
            return Err(ScriptcastError::Config(
                "FISH_API_KEY not set. Export it with: export FISH_API_KEY=...".to_string(),
            ));
        }
        if self.chunk_size_chars < MIN_CHUNK_SIZE_CHARS {
            return Err(ScriptcastError::Config(format!(
                "Chunk size must be at least {} characters, got {}",
                MIN_CHUNK_SIZE_CHARS, self.chunk_size_chars
            )));
        }
        if self.job_max_age_minutes == 0 || self.sweep_interval_secs == 0 {
            return Err(ScriptcastError::Config(
                "Job max age and sweep interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scriptcast").join("config.toml"))
    }
}
