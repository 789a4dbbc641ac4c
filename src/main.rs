use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scriptcast::audio::AudioRequest;
use scriptcast::client::RemoteClient;
use scriptcast::config::{AudioFormat, Config};
use scriptcast::interactive::run_interactive_wizard;
use scriptcast::jobs::JobResult;
use scriptcast::pipeline::{print_audio_summary, print_script_summary, ProgressBarSink};
use scriptcast::progress::CancelFlag;
use scriptcast::script::{Audience, ScriptRequest, Style, Tone};
use scriptcast::{print_summary, run_pipeline, PipelineRequest, Services};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "scriptcast")]
#[command(version, about = "Turn a topic into a narrated audio file")]
#[command(long_about = "Write a chaptered narration script with Google Gemini and voice it with Fish Audio text-to-speech.")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server
    Serve {
        /// Address to bind, e.g. 0.0.0.0:3000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Plan the chapter outline for a topic without writing it
    Preview(ScriptArgs),
    /// Write a script and save it
    Script(ScriptArgs),
    /// Narrate a text file
    Audio {
        /// Text file to narrate
        input: PathBuf,

        /// Title used to name the output file
        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        audio: AudioArgs,
    },
    /// Write a script and narrate it
    Generate {
        #[command(flatten)]
        script: ScriptArgs,

        #[command(flatten)]
        audio: AudioArgs,
    },
    /// Write and narrate on a running scriptcast server
    Remote {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,

        #[command(flatten)]
        script: ScriptArgs,

        #[command(flatten)]
        audio: AudioArgs,
    },
    /// Show the status of a job on a running server
    Status {
        /// Job id
        id: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,
    },
    /// Guided setup (default when no command is given)
    Interactive,
}

#[derive(Args)]
struct ScriptArgs {
    /// What the narration is about
    topic: String,

    /// Target spoken length in minutes
    #[arg(short, long, default_value = "5")]
    minutes: u32,

    /// educational, storytelling, conversational, documentary, motivational
    #[arg(long, default_value = "educational")]
    style: Style,

    /// general, beginners, intermediate, experts, children
    #[arg(long, default_value = "general")]
    audience: Audience,

    /// informative, friendly, professional, casual, inspirational
    #[arg(long, default_value = "informative")]
    tone: Tone,

    /// Text file with reference material for the writer
    #[arg(short, long)]
    reference: Option<PathBuf>,

    /// Write chapter by chapter even for short scripts
    #[arg(long)]
    chapters: bool,
}

impl ScriptArgs {
    fn to_request(&self) -> ScriptRequest {
        ScriptRequest {
            topic: self.topic.clone(),
            duration_minutes: self.minutes,
            style: self.style,
            audience: self.audience,
            tone: self.tone,
            reference_file: self.reference.clone(),
            use_chapters: self.chapters,
        }
    }
}

#[derive(Args)]
struct AudioArgs {
    /// Audio format: mp3, wav, opus, pcm
    #[arg(short, long)]
    format: Option<AudioFormat>,

    /// Maximum characters per synthesis request
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Voice model reference id
    #[arg(long)]
    voice: Option<String>,
}

fn pipeline_request(script: &ScriptArgs, audio: &AudioArgs) -> PipelineRequest {
    let mut request = PipelineRequest::new(script.to_request());
    request.format = audio.format;
    request.chunk_size_chars = audio.chunk_size;
    request.reference_id = audio.voice.clone();
    request
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn load_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

fn cancel_on_ctrlc() -> CancelFlag {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current step...");
        flag.cancel();
    }) {
        warn!("Could not install Ctrl+C handler: {}", e);
    }
    cancel
}

async fn generate(config: &Config, request: &PipelineRequest) -> Result<()> {
    let services = Services::from_config(config).context("Failed to set up services")?;
    let cancel = cancel_on_ctrlc();
    let sink = ProgressBarSink::new();

    match run_pipeline(&services, request, &sink, &cancel).await {
        Ok(result) => {
            sink.finish("Done");
            print_summary(&result);
            Ok(())
        }
        Err(e) => {
            sink.abandon();
            Err(e).context("Narration failed")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command.unwrap_or(Command::Interactive) {
        Command::Serve { bind } => {
            let mut config = load_config()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            scriptcast::server::serve(&config)
                .await
                .context("Server failed")?;
        }
        Command::Preview(args) => {
            let config = load_config()?;
            let services = Services::from_config(&config)?;
            let preview = services
                .assembler
                .preview(&args.to_request())
                .await
                .context("Failed to plan outline")?;

            println!("\n{}", preview.title);
            println!(
                "~{} min, ~{} words\n",
                preview.estimated_duration_minutes, preview.word_count_target
            );
            for chapter in &preview.chapters {
                println!("{:>3}. {}", chapter.number, chapter.title);
                if !chapter.description.is_empty() {
                    println!("     {}", chapter.description);
                }
            }
        }
        Command::Script(args) => {
            let config = load_config()?;
            let services = Services::from_config(&config)?;
            let cancel = cancel_on_ctrlc();
            let sink = ProgressBarSink::new();

            let script = services
                .assembler
                .generate(&args.to_request(), &sink, &cancel)
                .await;
            match script {
                Ok(script) => {
                    sink.finish("Script ready");
                    print_script_summary(&script);
                }
                Err(e) => {
                    sink.abandon();
                    return Err(e).context("Script generation failed");
                }
            }
        }
        Command::Audio {
            input,
            title,
            audio,
        } => {
            let config = load_config()?;
            let text = tokio::fs::read_to_string(&input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let title = title.or_else(|| {
                input
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            });

            let request = AudioRequest {
                text,
                format: audio.format,
                chunk_size_chars: audio.chunk_size,
                reference_id: audio.voice,
                title,
            };

            let services = Services::from_config(&config)?;
            let cancel = cancel_on_ctrlc();
            let sink = ProgressBarSink::new();
            match services.audio.run(&request, &sink, &cancel).await {
                Ok(result) => {
                    sink.finish("Audio ready");
                    print_audio_summary(&result);
                }
                Err(e) => {
                    sink.abandon();
                    return Err(e).context("Narration failed");
                }
            }
        }
        Command::Generate { script, audio } => {
            let config = load_config()?;
            generate(&config, &pipeline_request(&script, &audio)).await?;
        }
        Command::Remote {
            server,
            script,
            audio,
        } => {
            info!("Sending job to {}", server);
            let sink = ProgressBarSink::new();
            let result = RemoteClient::new(server)
                .run_pipeline(&pipeline_request(&script, &audio), &sink)
                .await;
            match result {
                Ok(result) => {
                    sink.finish("Done");
                    if let JobResult::Pipeline { ref script, .. } = result {
                        print_script_summary(script);
                    }
                    print_audio_summary(result.audio());
                }
                Err(e) => {
                    sink.abandon();
                    return Err(e).context("Remote job failed");
                }
            }
        }
        Command::Status { id, server } => {
            let job = RemoteClient::new(server)
                .get_job(&id)
                .await
                .context("Failed to fetch job status")?;
            match job {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => anyhow::bail!("Job not found: {}", id),
            }
        }
        Command::Interactive => {
            let wizard = run_interactive_wizard()?;
            wizard
                .config
                .validate()
                .context("Configuration validation failed")?;
            generate(&wizard.config, &wizard.request).await?;
        }
    }

    Ok(())
}
