//! Defines the TOML schema of a render profile: which passes exist, where
//! their sources live, how their four channels are bound, which images make
//! up the texture catalog and how the headless renderer should run.
//!
//! Types:
//!
//! - `Profile` captures top-level metadata, the optional shared `common`
//!   source, the ordered `[[passes]]` list and the `[[textures]]` catalog.
//! - `PassEntry` stores one pass identifier with either inline `code` or a
//!   `source` path, its channel list and an `enabled` switch.
//! - `ChannelEntry` accepts both the tagged `{ channel, kind, index | buffer }`
//!   form and the legacy integer encoding (`-1`, `0..=99`, `100..=103`).
//! - `RenderSettings` holds the `[render]` section consumed by the CLI.
//!
//! Functions:
//!
//! - `Profile::validate` returns human-readable issues so the loader can
//!   reject a profile before anything is compiled.
//! - `PassEntry::bindings` and `RenderSettings::debug_buffer_id` convert the
//!   textual form into the renderer's typed bindings.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use multipass::gpu::GpuPowerPreference;
use multipass::{BufferId, ChannelBinding, ChannelBindings, ConfigurationError, PassId, CHANNEL_COUNT};
use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_time_scale")]
    pub time_scale: f32,
    #[serde(default)]
    pub common: Option<String>,
    #[serde(default)]
    pub passes: Vec<PassEntry>,
    #[serde(default)]
    pub textures: Vec<TextureEntry>,
    #[serde(default)]
    pub render: RenderSettings,
}

fn default_time_scale() -> f32 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct PassEntry {
    pub pass: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ChannelEntry {
    /// Position in the list is the channel.
    Legacy(i32),
    Tagged(TaggedChannel),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TaggedChannel {
    pub channel: usize,
    #[serde(default)]
    pub kind: ChannelKind,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub buffer: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    None,
    Texture,
    Buffer,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TextureEntry {
    Path(PathBuf),
    Table { path: PathBuf },
}

impl TextureEntry {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Path(path) | Self::Table { path } => path,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderSettings {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(
        default = "default_frame_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub frame_interval: Duration,
    #[serde(default)]
    pub debug_buffer: Option<String>,
    #[serde(default)]
    pub power: PowerSetting,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            frames: default_frames(),
            frame_interval: default_frame_interval(),
            debug_buffer: None,
            power: PowerSetting::default(),
        }
    }
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    360
}

fn default_frames() -> u32 {
    1
}

fn default_frame_interval() -> Duration {
    Duration::from_secs_f64(1.0 / 60.0)
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerSetting {
    #[default]
    Low,
    High,
}

impl From<PowerSetting> for GpuPowerPreference {
    fn from(value: PowerSetting) -> Self {
        match value {
            PowerSetting::Low => GpuPowerPreference::Low,
            PowerSetting::High => GpuPowerPreference::High,
        }
    }
}

impl Profile {
    /// Time multiplier applied to `iTime`. Non-positive values fall back to 1.
    pub fn effective_time_scale(&self) -> f32 {
        multipass::effective_time_scale(self.time_scale)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.passes.is_empty() {
            issues.push("profile must declare at least one pass".to_string());
        }
        if self.time_scale.is_nan() {
            issues.push("time_scale must be a number".to_string());
        }

        let mut seen: Vec<PassId> = Vec::new();
        for entry in &self.passes {
            let pass = match entry.pass_id() {
                Ok(pass) => pass,
                Err(err) => {
                    issues.push(err.to_string());
                    continue;
                }
            };
            if seen.contains(&pass) {
                issues.push(format!("pass '{pass}' is declared more than once"));
            }
            seen.push(pass);

            if entry.code.is_some() && entry.source.is_some() {
                issues.push(format!("pass '{pass}' sets both code and source"));
            }
            if pass == PassId::Common {
                if self.common.is_some() {
                    issues.push("common source is set both inline and as a pass".to_string());
                }
                if !entry.channels.is_empty() {
                    issues.push("pass 'Common' cannot bind channels".to_string());
                }
                continue;
            }

            match entry.bindings() {
                Ok(bindings) => {
                    for binding in bindings.slots() {
                        if let ChannelBinding::Texture(index) = binding {
                            if *index >= self.textures.len() {
                                issues.push(format!(
                                    "pass '{pass}' references texture {index} but only {} are declared",
                                    self.textures.len()
                                ));
                            }
                        }
                    }
                }
                Err(err) => issues.push(format!("pass '{pass}': {err}")),
            }
        }

        if self.render.width == 0 || self.render.height == 0 {
            issues.push(format!(
                "render size {}x{} must be non-zero",
                self.render.width, self.render.height
            ));
        }
        if let Err(err) = self.render.debug_buffer_id() {
            issues.push(format!("debug_buffer: {err}"));
        }
        issues
    }
}

impl PassEntry {
    pub fn pass_id(&self) -> Result<PassId, ConfigurationError> {
        PassId::from_str(&self.pass)
    }

    /// Channel list as typed bindings. Unlisted channels stay unbound.
    pub fn bindings(&self) -> Result<ChannelBindings, ChannelEntryError> {
        let mut bindings = ChannelBindings::new();
        for (position, entry) in self.channels.iter().enumerate() {
            let (channel, binding) = entry.resolve(position)?;
            bindings.set(channel, binding)?;
        }
        Ok(bindings)
    }
}

/// Reasons a channel entry cannot be turned into a binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelEntryError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("channel {0} of kind texture needs an index")]
    MissingIndex(usize),
    #[error("channel {0} of kind buffer needs a buffer name")]
    MissingBuffer(usize),
    #[error("'{0}' does not name buffer A-D")]
    NotABuffer(String),
}

impl ChannelEntry {
    pub fn resolve(&self, position: usize) -> Result<(usize, ChannelBinding), ChannelEntryError> {
        match self {
            Self::Legacy(value) => Ok((position, ChannelBinding::from_legacy(*value)?)),
            Self::Tagged(tagged) => {
                let binding = match tagged.kind {
                    ChannelKind::None => ChannelBinding::None,
                    ChannelKind::Texture => ChannelBinding::Texture(
                        tagged
                            .index
                            .ok_or(ChannelEntryError::MissingIndex(tagged.channel))?,
                    ),
                    ChannelKind::Buffer => {
                        let name = tagged
                            .buffer
                            .as_deref()
                            .ok_or(ChannelEntryError::MissingBuffer(tagged.channel))?;
                        ChannelBinding::Buffer(parse_buffer(name)?)
                    }
                };
                if tagged.channel >= CHANNEL_COUNT {
                    return Err(ConfigurationError::ChannelOutOfRange(tagged.channel).into());
                }
                Ok((tagged.channel, binding))
            }
        }
    }
}

impl RenderSettings {
    pub fn debug_buffer_id(&self) -> Result<Option<BufferId>, ChannelEntryError> {
        self.debug_buffer.as_deref().map(parse_buffer).transpose()
    }
}

fn parse_buffer(name: &str) -> Result<BufferId, ChannelEntryError> {
    PassId::from_str(name)
        .ok()
        .and_then(PassId::buffer)
        .ok_or_else(|| ChannelEntryError::NotABuffer(name.to_string()))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}
