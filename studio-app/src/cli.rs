//! Command-line surface. One subcommand per console screen.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use studio_core::service::{AspectRatio, ImageSize, VideoAspect};

#[derive(Debug, Parser)]
#[command(name = "studio", version, about = "Operator console for the Gemini API")]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file to use instead of the default location.
    #[arg(long, global = true, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub screen: Screen,
}

#[derive(Debug, Subcommand)]
pub enum Screen {
    /// List the available screens.
    Dashboard,
    /// Chat with the model. Interactive when no prompt is given.
    Chat(ChatArgs),
    /// Generate or edit images.
    #[command(subcommand)]
    Image(ImageCommand),
    /// Generate or analyze videos.
    #[command(subcommand)]
    Video(VideoCommand),
    /// Real-time voice conversation. Press Enter to hang up.
    Live(LiveArgs),
    /// Answers grounded in Google Search or Google Maps.
    #[command(subcommand)]
    Ground(GroundCommand),
    /// Transcribe an audio file or a microphone recording.
    Transcribe(TranscribeArgs),
    /// Synthesize speech into a WAV file.
    Speak(SpeakArgs),
    /// List audio devices.
    Devices,
    /// Show or change persisted settings.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsCommand>,
    },
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Use the fast model instead of thinking mode.
    #[arg(long)]
    pub fast: bool,

    /// Also speak each reply into this WAV file (last reply wins).
    #[arg(long, value_name = "WAV")]
    pub speak: Option<PathBuf>,

    pub prompt: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ImageCommand {
    Generate {
        prompt: String,
        #[arg(long)]
        aspect: Option<AspectRatio>,
        #[arg(long)]
        size: Option<ImageSize>,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
        /// Edit the generated image with this instruction.
        #[arg(long, value_name = "INSTRUCTION")]
        edit: Option<String>,
    },
    Edit {
        image: PathBuf,
        instruction: String,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum VideoCommand {
    Generate {
        prompt: String,
        #[arg(long)]
        aspect: Option<VideoAspect>,
        /// Image to use as the first frame.
        #[arg(long, value_name = "FILE")]
        start_image: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    Analyze {
        file: PathBuf,
        #[arg(long, value_name = "TEXT")]
        prompt: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct LiveArgs {
    /// Microphone to use for this session.
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum GroundCommand {
    Search {
        query: String,
    },
    Maps {
        query: String,
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
    },
}

#[derive(Debug, Args)]
pub struct TranscribeArgs {
    #[arg(required_unless_present = "record")]
    pub file: Option<PathBuf>,

    /// Record this many seconds from the microphone instead of reading a file.
    #[arg(long, value_name = "SECS", conflicts_with = "file")]
    pub record: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SpeakArgs {
    pub text: String,
    #[arg(long, value_name = "WAV")]
    pub out: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    Show,
    /// Print the settings file location.
    Path,
    SetKey { key: String },
    ClearKey,
    /// Voice used by live sessions.
    SetVoice { name: String },
    /// Voice used by text-to-speech.
    SetTtsVoice { name: String },
    /// Preferred microphone; omit to use the system default.
    SetDevice { name: Option<String> },
    /// Default chat mode.
    Thinking {
        #[arg(action = clap::ArgAction::Set, value_parser = clap::builder::BoolishValueParser::new())]
        enabled: bool,
    },
    SetBaseUrl { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn image_flags_parse_into_typed_values() {
        let cli = Cli::parse_from([
            "studio", "image", "generate", "a red lamp", "--aspect", "16:9", "--size", "2K",
        ]);
        let Screen::Image(ImageCommand::Generate { aspect, size, .. }) = cli.screen else {
            panic!("expected image generate");
        };
        assert_eq!(aspect, Some(AspectRatio::Landscape16x9));
        assert_eq!(size, Some(ImageSize::TwoK));
    }

    #[test]
    fn maps_coordinates_must_come_together() {
        let err = Cli::try_parse_from(["studio", "ground", "maps", "cafes", "--lat", "41.0"]);
        assert!(err.is_err());
        let ok = Cli::try_parse_from([
            "studio", "ground", "maps", "cafes", "--lat", "41.0", "--lng", "-28.9",
        ]);
        assert!(ok.is_ok());
    }

    #[test]
    fn transcribe_needs_a_source() {
        assert!(Cli::try_parse_from(["studio", "transcribe"]).is_err());
        assert!(Cli::try_parse_from(["studio", "transcribe", "--record", "5"]).is_ok());
    }
}
