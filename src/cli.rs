use clap::{Parser, ValueEnum};

use crate::zip::{CompressionLevel, EncryptionMethod, ExtractExistingFileAction, Zip64Option};

#[derive(Parser, Debug)]
#[command(name = "zipkit")]
#[command(version)]
#[command(about = "List, extract, create and update ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipkit data1.zip -x joe                 extract all files except joe from data1.zip\n  \
  zipkit -p foo.zip | more                send contents of foo.zip via pipe into more\n  \
  zipkit -a src docs -P pw --encrypt aes256 out.zip   add two directories, encrypted")]
pub struct Cli {
    /// ZIP file path
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely; also raises log output to info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Password for encrypted entries, and for new entries with --encrypt
    #[arg(short = 'P', value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Add or update files and directories, creating FILE if needed
    #[arg(short = 'a', value_name = "PATH", num_args = 1..)]
    pub add: Vec<String>,

    /// Encryption for added entries
    #[arg(long, value_enum, value_name = "METHOD", requires = "password")]
    pub encrypt: Option<Encryption>,

    /// Zip64 policy for written archives
    #[arg(long, value_enum, default_value_t = Zip64Policy::AsNeeded)]
    pub zip64: Zip64Policy,

    /// Deflate level for added entries (0 stores)
    #[arg(long, value_name = "0-9", value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: Option<u32>,

    /// Set the archive comment
    #[arg(short = 'z', value_name = "COMMENT")]
    pub comment: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encryption {
    Pkzip,
    Aes128,
    Aes192,
    Aes256,
}

impl From<Encryption> for EncryptionMethod {
    fn from(value: Encryption) -> Self {
        match value {
            Encryption::Pkzip => EncryptionMethod::PkzipWeak,
            Encryption::Aes128 => EncryptionMethod::WinZipAes128,
            Encryption::Aes192 => EncryptionMethod::WinZipAes192,
            Encryption::Aes256 => EncryptionMethod::WinZipAes256,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zip64Policy {
    Never,
    AsNeeded,
    Always,
}

impl From<Zip64Policy> for Zip64Option {
    fn from(value: Zip64Policy) -> Self {
        match value {
            Zip64Policy::Never => Zip64Option::Never,
            Zip64Policy::AsNeeded => Zip64Option::AsNecessary,
            Zip64Policy::Always => Zip64Option::Always,
        }
    }
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Whether the archive is written rather than read.
    pub fn is_update(&self) -> bool {
        !self.add.is_empty() || self.comment.is_some()
    }

    pub fn compression_level(&self) -> Option<CompressionLevel> {
        self.level.map(|n| if n == 0 { CompressionLevel::None } else { CompressionLevel::Level(n) })
    }

    /// `-o` wins over `-n`; without either, existing files are kept.
    pub fn existing_action(&self) -> ExtractExistingFileAction {
        if self.overwrite {
            ExtractExistingFileAction::OverwriteSilently
        } else {
            ExtractExistingFileAction::DoNotOverwrite
        }
    }
}
