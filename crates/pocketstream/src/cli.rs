use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;

use clap::{CommandFactory as _, Parser};
use pocketstream_core::SessionArgs;
use pocketstream_core::session::{
    DEFAULT_OUTPUT_DIRECTORY, DEFAULT_SEGMENT_DURATION, DEFAULT_SOURCE,
};
use pocketstream_core::supervisor::DEFAULT_TOOL;

const AFTER_HELP: &str = "\
FFmpeg dependency is necessary.
Specifying ports is optional

Usage example:
  pocketstream -t OBHWYICqacQK2yFQGdQNe72O752SBVti3sU5w-Ri8KM= --dest https://example.com";

/// PocketStream - live
#[derive(Debug, Parser)]
#[command(name = "pocketstream", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Authorization token to be passed in the headers
    #[arg(
        short = 't',
        long = "token",
        value_name = "BASE64",
        env = "POCKETSTREAM_TOKEN",
        allow_hyphen_values = true,
        hide_env_values = true
    )]
    pub token: Option<String>,

    /// RTMP source stream address
    #[arg(
        long = "source",
        visible_alias = "src",
        value_name = "HOST:PORT",
        env = "POCKETSTREAM_SOURCE",
        default_value = DEFAULT_SOURCE
    )]
    pub source: String,

    /// Destination domain where the server is running on
    #[arg(
        short = 'd',
        long = "dest",
        visible_alias = "domain",
        value_name = "SCHEME://HOST:PORT",
        env = "POCKETSTREAM_DESTINATION",
        allow_hyphen_values = true
    )]
    pub destination: Option<String>,

    /// Segment duration in seconds
    #[arg(
        short = 's',
        long = "segment",
        visible_alias = "seg",
        value_name = "SECONDS",
        env = "POCKETSTREAM_SEGMENT",
        allow_hyphen_values = true,
        default_value = DEFAULT_SEGMENT_DURATION
    )]
    pub segment_duration: String,

    /// Directory ffmpeg writes segments into before they are uploaded
    #[arg(
        short = 'o',
        long = "output",
        value_name = "DIR",
        env = "POCKETSTREAM_OUTPUT",
        default_value = DEFAULT_OUTPUT_DIRECTORY
    )]
    pub output_directory: PathBuf,

    /// Let ffmpeg upload segments and playlist itself instead of tailing its output
    #[arg(short = 'u', long = "ffmpeg-upload", env = "POCKETSTREAM_FFMPEG_UPLOAD")]
    pub ffmpeg_upload: bool,

    /// Append error messages to pocketstream.errors.log in the working directory
    #[arg(short = 'e', long = "persist-errors", env = "POCKETSTREAM_PERSIST_ERRORS")]
    pub persist_errors: bool,

    /// ffmpeg executable
    #[arg(
        long = "ffmpeg",
        value_name = "PATH",
        env = "POCKETSTREAM_FFMPEG",
        default_value = DEFAULT_TOOL
    )]
    pub ffmpeg: String,

    /// Maximum concurrent segment uploads in local-file mode
    #[arg(long = "upload-workers", value_name = "N", default_value_t = 4)]
    pub upload_workers: usize,

    /// Timeout for each HTTP request, in seconds
    #[arg(long = "http-timeout", value_name = "SECONDS", default_value_t = 30)]
    pub http_timeout_secs: u64,
}

impl Cli {
    pub fn session_args(&self) -> SessionArgs {
        SessionArgs {
            token: self.token.clone().unwrap_or_default(),
            source: self.source.clone(),
            destination: self.destination.clone().unwrap_or_default(),
            segment_duration: self.segment_duration.clone(),
            output_directory: Some(self.output_directory.clone()),
            self_push: self.ffmpeg_upload,
            persist_errors: self.persist_errors,
        }
    }
}

/// Single-dash spellings accepted for compatibility with older scripts.
const LEGACY_FLAGS: &[(&str, &str)] = &[("-src", "--source"), ("-help", "--help")];

/// Rewrite legacy flags and drop anything clap would reject as unknown.
/// Returns the cleaned arguments (program name first) and the dropped ones.
pub fn normalize_args<I>(raw: I) -> (Vec<OsString>, Vec<String>)
where
    I: IntoIterator<Item = OsString>,
{
    let command = Cli::command();
    let mut flags: HashSet<String> = ["-h", "--help", "-V", "--version"]
        .into_iter()
        .map(String::from)
        .collect();
    let mut value_flags: HashSet<String> = HashSet::new();
    for arg in command.get_arguments() {
        let mut names: Vec<String> = Vec::new();
        if let Some(short) = arg.get_short() {
            names.push(format!("-{short}"));
        }
        if let Some(long) = arg.get_long() {
            names.push(format!("--{long}"));
        }
        for alias in arg.get_all_aliases().unwrap_or_default() {
            names.push(format!("--{alias}"));
        }
        if arg.get_action().takes_values() {
            value_flags.extend(names.iter().cloned());
        }
        flags.extend(names);
    }

    let mut raw = raw.into_iter();
    let mut cleaned: Vec<OsString> = raw.next().into_iter().collect();
    let mut unknown = Vec::new();
    let mut expects_value = false;
    for arg in raw {
        if expects_value {
            cleaned.push(arg);
            expects_value = false;
            continue;
        }
        let text = arg.to_string_lossy().into_owned();
        let text = LEGACY_FLAGS
            .iter()
            .find(|(legacy, _)| *legacy == text)
            .map_or(text.clone(), |(_, modern)| (*modern).to_string());
        let name = flag_name(&text);
        if flags.contains(name) {
            // `--token=x` and `-tx` carry their value inline.
            expects_value = value_flags.contains(name) && name.len() == text.len();
            cleaned.push(OsString::from(text));
        } else {
            unknown.push(text);
        }
    }
    (cleaned, unknown)
}

fn flag_name(arg: &str) -> &str {
    if let Some(long) = arg.strip_prefix("--") {
        return &arg[..2 + long.find('=').unwrap_or(long.len())];
    }
    if arg.starts_with('-') && arg.len() > 2 && arg.is_char_boundary(2) {
        return &arg[..2];
    }
    arg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn legacy_source_flag_is_rewritten() {
        let (cleaned, unknown) =
            normalize_args(os(&["pocketstream", "-src", "localhost:1935", "-t", "abc"]));
        assert!(unknown.is_empty());
        let cli = Cli::try_parse_from(cleaned).unwrap();
        assert_eq!(cli.source, "localhost:1935");
        assert_eq!(cli.token.as_deref(), Some("abc"));
    }

    #[test]
    fn unknown_flags_are_dropped_and_reported() {
        let (cleaned, unknown) = normalize_args(os(&[
            "pocketstream",
            "--bogus",
            "-t",
            "abc",
            "stray",
            "--dest",
            "https://example.com",
        ]));
        assert_eq!(unknown, vec!["--bogus".to_string(), "stray".to_string()]);
        let cli = Cli::try_parse_from(cleaned).unwrap();
        assert_eq!(cli.destination.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn values_that_look_like_flags_are_kept() {
        let (cleaned, unknown) =
            normalize_args(os(&["pocketstream", "-t", "-weird-token", "-s", "2.5"]));
        assert!(unknown.is_empty());
        let cli = Cli::try_parse_from(cleaned).unwrap();
        assert_eq!(cli.token.as_deref(), Some("-weird-token"));
        assert_eq!(cli.segment_duration, "2.5");
    }

    #[test]
    fn inline_values_and_aliases_are_recognized() {
        let (cleaned, unknown) = normalize_args(os(&[
            "pocketstream",
            "--token=abc",
            "--domain",
            "https://example.com/",
            "--seg",
            "3",
            "-u",
        ]));
        assert!(unknown.is_empty(), "{unknown:?}");
        let cli = Cli::try_parse_from(cleaned).unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert_eq!(cli.segment_duration, "3");
        assert!(cli.ffmpeg_upload);
    }

    #[test]
    fn session_args_carry_defaults() {
        let cli = Cli::try_parse_from(["pocketstream", "-t", "abc", "-d", "https://example.com"])
            .unwrap();
        let args = cli.session_args();
        assert_eq!(args.source, "localhost:9000");
        assert_eq!(args.segment_duration, "2");
        assert_eq!(args.output_directory, Some(PathBuf::from("stream")));
        assert!(!args.self_push);
        assert!(!args.persist_errors);
    }

    #[test]
    fn missing_token_becomes_empty() {
        let cli = Cli::try_parse_from(["pocketstream", "-d", "https://example.com"]).unwrap();
        assert!(cli.session_args().token.is_empty());
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
