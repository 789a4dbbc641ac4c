use crate::config::{AudioFormat, Config};
use crate::pipeline::PipelineRequest;
use crate::script::{
    Audience, ScriptRequest, Style, Tone, LONG_FORM_THRESHOLD_MINUTES, MAX_DURATION_MINUTES,
    MIN_DURATION_MINUTES, SPOKEN_WORDS_PER_MINUTE,
};
use console::style;
use dialoguer::{Confirm, Input, Select};
use std::fs;
use std::path::PathBuf;

const DURATION_PRESETS: &[u32] = &[3, 5, 10, 20, 30, 60];

pub struct InteractiveResult {
    pub config: Config,
    pub request: PipelineRequest,
}

pub fn run_interactive_wizard() -> anyhow::Result<InteractiveResult> {
    print_header();

    let config = setup_api_keys()?;

    let topic = enter_topic()?;
    let duration_minutes = select_duration()?;

    let mut script = ScriptRequest::new(topic, duration_minutes);
    script.style = select_option("Narration style", &Style::ALL)?;
    script.audience = select_option("Target audience", &Audience::ALL)?;
    script.tone = select_option("Tone", &Tone::ALL)?;
    script.use_chapters = setup_chapters(duration_minutes)?;
    script.reference_file = select_reference_file()?;

    let mut request = PipelineRequest::new(script);
    request.format = Some(select_audio_format(config.audio_format)?);

    print_summary(&request, &config);

    if !Confirm::new()
        .with_prompt("Proceed with these settings?")
        .default(true)
        .interact()?
    {
        anyhow::bail!("Cancelled by user");
    }

    println!();

    Ok(InteractiveResult { config, request })
}

fn print_header() {
    println!();
    println!(
        "{}",
        style("╔═══════════════════════════════════════════════════╗").cyan()
    );
    println!(
        "{}",
        style("║        scriptcast - Topic to Narrated Audio        ║").cyan()
    );
    println!(
        "{}",
        style("╚═══════════════════════════════════════════════════╝").cyan()
    );
    println!();
}

fn setup_api_keys() -> anyhow::Result<Config> {
    let mut config = Config::load().unwrap_or_default();
    let mut changed = false;

    if config.gemini_api_key.is_some() {
        println!("{} Gemini API key configured", style("✓").green());
    } else {
        println!("{} Gemini API key not found", style("!").yellow());
        println!("  Get one at: https://aistudio.google.com/apikey\n");
        config.gemini_api_key = Some(prompt_key("Enter your Gemini API key")?);
        changed = true;
    }

    if config.fish_api_key.is_some() {
        println!("{} Fish Audio API key configured", style("✓").green());
    } else {
        println!("{} Fish Audio API key not found", style("!").yellow());
        println!("  Get one at: https://fish.audio/app/api-keys\n");
        config.fish_api_key = Some(prompt_key("Enter your Fish Audio API key")?);
        changed = true;
    }

    if changed
        && Confirm::new()
            .with_prompt("Save API keys to config file?")
            .default(true)
            .interact()?
    {
        save_config(&config)?;
        println!("{} API keys saved to config\n", style("✓").green());
    }

    Ok(config)
}

fn prompt_key(prompt: &str) -> anyhow::Result<String> {
    let key: String = Input::new().with_prompt(prompt).interact_text()?;
    if key.trim().is_empty() {
        anyhow::bail!("API key is required");
    }
    Ok(key.trim().to_string())
}

fn save_config(config: &Config) -> anyhow::Result<()> {
    if let Some(config_dir) = dirs::config_dir() {
        let app_dir = config_dir.join("scriptcast");
        fs::create_dir_all(&app_dir)?;

        let config_path = app_dir.join("config.toml");
        let toml_content = toml::to_string_pretty(config)?;
        fs::write(config_path, toml_content)?;
    }
    Ok(())
}

fn enter_topic() -> anyhow::Result<String> {
    println!("\n{}", style("What should the narration be about?").bold());
    let topic: String = Input::new()
        .with_prompt("Topic")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Topic is required")
            } else {
                Ok(())
            }
        })
        .interact_text()?;
    Ok(topic.trim().to_string())
}

fn select_duration() -> anyhow::Result<u32> {
    let mut items: Vec<String> = DURATION_PRESETS
        .iter()
        .map(|&minutes| describe_duration(minutes))
        .collect();
    items.push("Custom...".to_string());

    let selection = Select::new()
        .with_prompt("Target length")
        .items(&items)
        .default(1)
        .interact()?;

    if selection < DURATION_PRESETS.len() {
        return Ok(DURATION_PRESETS[selection]);
    }

    let minutes: u32 = Input::new()
        .with_prompt(format!(
            "Minutes ({}-{})",
            MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
        ))
        .validate_with(|m: &u32| -> Result<(), String> {
            if (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(m) {
                Ok(())
            } else {
                Err(format!(
                    "Duration must be between {} and {} minutes",
                    MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
                ))
            }
        })
        .interact_text()?;
    Ok(minutes)
}

fn describe_duration(minutes: u32) -> String {
    let words = (minutes as f64 * SPOKEN_WORDS_PER_MINUTE).round() as u32;
    if minutes >= LONG_FORM_THRESHOLD_MINUTES {
        format!("{} min (~{} words, chapters)", minutes, words)
    } else {
        format!("{} min (~{} words)", minutes, words)
    }
}

fn select_option<T: Copy + std::fmt::Display>(prompt: &str, options: &[T]) -> anyhow::Result<T> {
    let items: Vec<String> = options.iter().map(|o| capitalize(&o.to_string())).collect();
    let selection = Select::new()
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact()?;
    Ok(options[selection])
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn setup_chapters(duration_minutes: u32) -> anyhow::Result<bool> {
    if duration_minutes >= LONG_FORM_THRESHOLD_MINUTES {
        println!(
            "{} Scripts of {}+ minutes are always written chapter by chapter",
            style("i").blue(),
            LONG_FORM_THRESHOLD_MINUTES
        );
        return Ok(true);
    }

    Ok(Confirm::new()
        .with_prompt("Write the script chapter by chapter?")
        .default(false)
        .interact()?)
}

fn select_reference_file() -> anyhow::Result<Option<PathBuf>> {
    if !Confirm::new()
        .with_prompt("Use a reference text file?")
        .default(false)
        .interact()?
    {
        return Ok(None);
    }

    let path: String = Input::new()
        .with_prompt("Enter file path")
        .interact_text()?;
    let path = PathBuf::from(path.trim());
    if !path.is_file() {
        anyhow::bail!("File not found: {}", path.display());
    }
    Ok(Some(path))
}

fn select_audio_format(default: AudioFormat) -> anyhow::Result<AudioFormat> {
    let formats = [
        ("MP3", "Smallest files, plays everywhere", AudioFormat::Mp3),
        ("WAV", "Uncompressed, for editing", AudioFormat::Wav),
        ("Opus", "Efficient streaming codec", AudioFormat::Opus),
    ];

    let items: Vec<String> = formats
        .iter()
        .map(|(name, desc, _)| format!("{} - {}", name, desc))
        .collect();
    let default_idx = formats
        .iter()
        .position(|(_, _, f)| *f == default)
        .unwrap_or(0);

    let selection = Select::new()
        .with_prompt("Select audio format")
        .items(&items)
        .default(default_idx)
        .interact()?;

    Ok(formats[selection].2)
}

fn print_summary(request: &PipelineRequest, config: &Config) {
    let script = &request.script;
    println!("\n{}", style("═══ Summary ═══").bold());
    println!("  Topic:     {}", style(&script.topic).cyan());
    println!("  Length:    {}", describe_duration(script.duration_minutes));
    println!(
        "  Style:     {} / {} / {}",
        script.style, script.audience, script.tone
    );
    println!(
        "  Chapters:  {}",
        if script.requires_chapters() { "yes" } else { "no" }
    );
    if let Some(ref path) = script.reference_file {
        println!("  Reference: {}", path.display());
    }
    println!(
        "  Format:    {}",
        request
            .format
            .unwrap_or(config.audio_format)
            .extension()
            .to_uppercase()
    );
    println!("  Output:    {}", style(config.output_dir.display()).cyan());
    println!();
}
