use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Every pass exposes four optional input channels (`iChannel0-3`).
pub const CHANNEL_COUNT: usize = 4;

/// Number of off-screen buffers (A, B, C, D).
pub const BUFFER_COUNT: usize = 4;

/// Legacy integer encoding used by older profiles for "no input".
pub const LEGACY_BINDING_NONE: i32 = -1;
/// Legacy integer encoding of Buffer A; B, C and D follow consecutively.
pub const LEGACY_BINDING_BUFFER_A: i32 = 100;
const LEGACY_TEXTURE_MAX: i32 = 99;

/// Identifies one of the source slots a document can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    BufferA,
    BufferB,
    BufferC,
    BufferD,
    Image,
    /// Shared source merged ahead of every other pass. Never executed.
    Common,
}

/// Fixed execution order of a frame. `Common` never appears here.
pub const RENDER_ORDER: [PassId; 5] = [
    PassId::BufferA,
    PassId::BufferB,
    PassId::BufferC,
    PassId::BufferD,
    PassId::Image,
];

impl PassId {
    /// Human-readable name used in logs and error prefixes.
    pub fn name(self) -> &'static str {
        match self {
            PassId::BufferA => "Buffer A",
            PassId::BufferB => "Buffer B",
            PassId::BufferC => "Buffer C",
            PassId::BufferD => "Buffer D",
            PassId::Image => "Image",
            PassId::Common => "Common",
        }
    }

    /// Returns the backing buffer for buffer passes.
    pub fn buffer(self) -> Option<BufferId> {
        match self {
            PassId::BufferA => Some(BufferId::A),
            PassId::BufferB => Some(BufferId::B),
            PassId::BufferC => Some(BufferId::C),
            PassId::BufferD => Some(BufferId::D),
            PassId::Image | PassId::Common => None,
        }
    }

    pub fn is_renderable(self) -> bool {
        !matches!(self, PassId::Common)
    }

    /// Index into per-pass slot tables; `None` for `Common`.
    pub(crate) fn slot_index(self) -> Option<usize> {
        match self {
            PassId::BufferA => Some(0),
            PassId::BufferB => Some(1),
            PassId::BufferC => Some(2),
            PassId::BufferD => Some(3),
            PassId::Image => Some(4),
            PassId::Common => None,
        }
    }
}

impl fmt::Display for PassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PassId {
    type Err = ConfigurationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "buffera" | "a" => Ok(PassId::BufferA),
            "bufferb" | "b" => Ok(PassId::BufferB),
            "bufferc" | "c" => Ok(PassId::BufferC),
            "bufferd" | "d" => Ok(PassId::BufferD),
            "image" | "main" => Ok(PassId::Image),
            "common" => Ok(PassId::Common),
            _ => Err(ConfigurationError::UnknownPass(raw.to_string())),
        }
    }
}

/// One of the four double-buffered off-screen targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferId {
    A,
    B,
    C,
    D,
}

impl BufferId {
    pub const ALL: [BufferId; BUFFER_COUNT] = [BufferId::A, BufferId::B, BufferId::C, BufferId::D];

    pub fn index(self) -> usize {
        match self {
            BufferId::A => 0,
            BufferId::B => 1,
            BufferId::C => 2,
            BufferId::D => 3,
        }
    }

    pub fn pass(self) -> PassId {
        match self {
            BufferId::A => PassId::BufferA,
            BufferId::B => PassId::BufferB,
            BufferId::C => PassId::BufferC,
            BufferId::D => PassId::BufferD,
        }
    }
}

impl TryFrom<usize> for BufferId {
    type Error = ConfigurationError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        BufferId::ALL
            .get(index)
            .copied()
            .ok_or(ConfigurationError::BufferIndexOutOfRange(index))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pass().name())
    }
}

/// Describes what a single input channel samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelBinding {
    #[default]
    None,
    /// Index into the caller's texture catalog.
    Texture(usize),
    /// Readable (previous frame) surface of a buffer. May be the pass itself.
    Buffer(BufferId),
}

impl ChannelBinding {
    /// Decodes the integer form stored by older profiles: `-1` is empty,
    /// `0..=99` indexes the texture catalog, `100..=103` selects Buffer A-D.
    pub fn from_legacy(value: i32) -> Result<Self, ConfigurationError> {
        match value {
            LEGACY_BINDING_NONE => Ok(ChannelBinding::None),
            0..=LEGACY_TEXTURE_MAX => Ok(ChannelBinding::Texture(value as usize)),
            LEGACY_BINDING_BUFFER_A..=103 => {
                let index = (value - LEGACY_BINDING_BUFFER_A) as usize;
                Ok(ChannelBinding::Buffer(BufferId::try_from(index)?))
            }
            other => Err(ConfigurationError::InvalidLegacyBinding(other)),
        }
    }
}

/// Channel table of one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelBindings {
    slots: [ChannelBinding; CHANNEL_COUNT],
}

impl ChannelBindings {
    /// Creates an empty bindings table with all channels unassigned.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: [ChannelBinding; CHANNEL_COUNT]) -> Self {
        Self { slots }
    }

    /// Builds a table from the legacy integer encoding.
    pub fn from_legacy(values: [i32; CHANNEL_COUNT]) -> Result<Self, ConfigurationError> {
        let mut bindings = Self::new();
        for (channel, value) in values.into_iter().enumerate() {
            bindings.slots[channel] = ChannelBinding::from_legacy(value)?;
        }
        Ok(bindings)
    }

    /// Assigns a channel. Out-of-range channels leave the table untouched.
    pub fn set(&mut self, channel: usize, binding: ChannelBinding) -> Result<(), ConfigurationError> {
        let slot = self
            .slots
            .get_mut(channel)
            .ok_or(ConfigurationError::ChannelOutOfRange(channel))?;
        *slot = binding;
        Ok(())
    }

    /// Builder-style variant of [`ChannelBindings::set`].
    pub fn with(mut self, channel: usize, binding: ChannelBinding) -> Result<Self, ConfigurationError> {
        self.set(channel, binding)?;
        Ok(self)
    }

    pub fn get(&self, channel: usize) -> Option<ChannelBinding> {
        self.slots.get(channel).copied()
    }

    pub fn slots(&self) -> &[ChannelBinding; CHANNEL_COUNT] {
        &self.slots
    }

    /// Buffers this pass reads from, in channel order.
    pub fn buffer_inputs(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.slots.iter().filter_map(|binding| match binding {
            ChannelBinding::Buffer(id) => Some(*id),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_order_ends_with_image_and_skips_common() {
        assert_eq!(RENDER_ORDER.last(), Some(&PassId::Image));
        assert!(!RENDER_ORDER.contains(&PassId::Common));
        for (index, pass) in RENDER_ORDER.iter().enumerate() {
            assert_eq!(pass.slot_index(), Some(index));
        }
    }

    #[test]
    fn parses_pass_names_loosely() {
        assert_eq!("buffer_a".parse::<PassId>().unwrap(), PassId::BufferA);
        assert_eq!("Buffer B".parse::<PassId>().unwrap(), PassId::BufferB);
        assert_eq!("bufferC".parse::<PassId>().unwrap(), PassId::BufferC);
        assert_eq!("d".parse::<PassId>().unwrap(), PassId::BufferD);
        assert_eq!("IMAGE".parse::<PassId>().unwrap(), PassId::Image);
        assert_eq!("common".parse::<PassId>().unwrap(), PassId::Common);
        assert!(matches!(
            "sound".parse::<PassId>(),
            Err(ConfigurationError::UnknownPass(name)) if name == "sound"
        ));
    }

    #[test]
    fn decodes_legacy_channel_integers() {
        assert_eq!(ChannelBinding::from_legacy(-1).unwrap(), ChannelBinding::None);
        assert_eq!(ChannelBinding::from_legacy(7).unwrap(), ChannelBinding::Texture(7));
        assert_eq!(
            ChannelBinding::from_legacy(100).unwrap(),
            ChannelBinding::Buffer(BufferId::A)
        );
        assert_eq!(
            ChannelBinding::from_legacy(103).unwrap(),
            ChannelBinding::Buffer(BufferId::D)
        );
        assert!(ChannelBinding::from_legacy(104).is_err());
        assert!(ChannelBinding::from_legacy(-2).is_err());
        assert!(ChannelBinding::from_legacy(150).is_err());
    }

    #[test]
    fn out_of_range_channel_leaves_bindings_untouched() {
        let mut bindings = ChannelBindings::new()
            .with(0, ChannelBinding::Buffer(BufferId::A))
            .unwrap();
        let before = bindings;
        let err = bindings.set(4, ChannelBinding::Texture(1)).unwrap_err();
        assert!(matches!(err, ConfigurationError::ChannelOutOfRange(4)));
        assert_eq!(bindings, before);
        assert_eq!(bindings.buffer_inputs().collect::<Vec<_>>(), vec![BufferId::A]);
    }

    #[test]
    fn buffer_index_conversion_rejects_out_of_range() {
        assert_eq!(BufferId::try_from(2).unwrap(), BufferId::C);
        assert!(matches!(
            BufferId::try_from(4),
            Err(ConfigurationError::BufferIndexOutOfRange(4))
        ));
    }
}
