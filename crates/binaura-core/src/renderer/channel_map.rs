//! Input layouts and HRIR channel conventions
//!
//! An input layout names the speaker each input channel feeds. An HRIR
//! convention says, for a given HRIR channel count, which two HRIR
//! channels hold a speaker's left-ear and right-ear responses.
//!
//! | HRIR channels | Convention | Order |
//! |---|---|---|
//! | 2  | symmetric pair | L→L, L→R (right speakers mirrored) |
//! | 4  | true stereo    | L→L, L→R, R→L, R→R |
//! | 7  | HeSuVi half    | FL-L FL-R SL-L SL-R BL-L BL-R C-L |
//! | 14 | HeSuVi full    | FL-L FL-R SL-L SL-R BL-L BL-R C-L FR-R FR-L SR-R SR-L BR-R BR-L C-R |

use crate::preset::{PresetError, PresetResult};

/// Speaker position fed by one input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    FrontLeft,
    FrontRight,
    Center,
    Lfe,
    SideLeft,
    SideRight,
    BackLeft,
    BackRight,
}

/// Input channel layout, detected from the input range width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputLayout {
    Mono,
    Stereo,
    /// FL FR BL BR
    Quad,
    /// FL FR C LFE SL SR
    Surround51,
    /// FL FR C LFE BL BR SL SR
    Surround71,
    /// Any other width: consecutive front stereo pairs
    Custom(usize),
}

impl InputLayout {
    /// Layout for an input width; `None` for zero channels
    pub fn detect(channels: usize) -> Option<Self> {
        match channels {
            0 => None,
            1 => Some(InputLayout::Mono),
            2 => Some(InputLayout::Stereo),
            4 => Some(InputLayout::Quad),
            6 => Some(InputLayout::Surround51),
            8 => Some(InputLayout::Surround71),
            n => Some(InputLayout::Custom(n)),
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            InputLayout::Mono => 1,
            InputLayout::Stereo => 2,
            InputLayout::Quad => 4,
            InputLayout::Surround51 => 6,
            InputLayout::Surround71 => 8,
            InputLayout::Custom(n) => *n,
        }
    }

    /// Speaker for each input channel, in channel order
    pub fn speakers(&self) -> Vec<Speaker> {
        use Speaker::*;
        match self {
            InputLayout::Mono => vec![Center],
            InputLayout::Stereo => vec![FrontLeft, FrontRight],
            InputLayout::Quad => vec![FrontLeft, FrontRight, BackLeft, BackRight],
            InputLayout::Surround51 => {
                vec![FrontLeft, FrontRight, Center, Lfe, SideLeft, SideRight]
            }
            InputLayout::Surround71 => vec![
                FrontLeft, FrontRight, Center, Lfe, BackLeft, BackRight, SideLeft, SideRight,
            ],
            InputLayout::Custom(n) => (0..*n)
                .map(|i| if i % 2 == 0 { FrontLeft } else { FrontRight })
                .collect(),
        }
    }
}

impl std::fmt::Display for InputLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputLayout::Mono => write!(f, "mono"),
            InputLayout::Stereo => write!(f, "stereo"),
            InputLayout::Quad => write!(f, "quad"),
            InputLayout::Surround51 => write!(f, "5.1"),
            InputLayout::Surround71 => write!(f, "7.1"),
            InputLayout::Custom(n) => write!(f, "{} channels", n),
        }
    }
}

/// HRIR channels holding one speaker's left- and right-ear responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarPair {
    pub left: usize,
    pub right: usize,
}

const fn pair(left: usize, right: usize) -> EarPair {
    EarPair { left, right }
}

/// How an HRIR file's channels are ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HrirConvention {
    SymmetricPair,
    TrueStereo,
    HesuviHalf,
    HesuviFull,
}

impl HrirConvention {
    pub fn from_channels(channels: usize) -> PresetResult<Self> {
        match channels {
            2 => Ok(HrirConvention::SymmetricPair),
            4 => Ok(HrirConvention::TrueStereo),
            7 => Ok(HrirConvention::HesuviHalf),
            14 => Ok(HrirConvention::HesuviFull),
            n => Err(PresetError::UnsupportedLayout(n)),
        }
    }

    /// Ear pair for a speaker; LFE uses the centre pair
    pub fn ear_pair(&self, speaker: Speaker) -> EarPair {
        use Speaker::*;
        match self {
            // Sides and backs reuse the front measurements
            HrirConvention::SymmetricPair => match speaker {
                FrontLeft | SideLeft | BackLeft => pair(0, 1),
                FrontRight | SideRight | BackRight => pair(1, 0),
                Center | Lfe => pair(0, 0),
            },
            HrirConvention::TrueStereo => match speaker {
                FrontLeft | SideLeft | BackLeft => pair(0, 1),
                FrontRight | SideRight | BackRight => pair(2, 3),
                Center | Lfe => pair(0, 3),
            },
            HrirConvention::HesuviHalf => match speaker {
                FrontLeft => pair(0, 1),
                FrontRight => pair(1, 0),
                SideLeft => pair(2, 3),
                SideRight => pair(3, 2),
                BackLeft => pair(4, 5),
                BackRight => pair(5, 4),
                Center | Lfe => pair(6, 6),
            },
            HrirConvention::HesuviFull => match speaker {
                FrontLeft => pair(0, 1),
                FrontRight => pair(8, 7),
                SideLeft => pair(2, 3),
                SideRight => pair(10, 9),
                BackLeft => pair(4, 5),
                BackRight => pair(12, 11),
                Center | Lfe => pair(6, 13),
            },
        }
    }
}

/// Ear pair per input channel for one preset activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    layout: InputLayout,
    convention: HrirConvention,
    entries: Vec<(Speaker, EarPair)>,
}

impl ChannelMap {
    /// Map every input channel and validate against the HRIR channel count
    pub fn build(layout: InputLayout, hrir_channels: usize) -> PresetResult<Self> {
        let convention = HrirConvention::from_channels(hrir_channels)?;

        let entries: Vec<(Speaker, EarPair)> = layout
            .speakers()
            .into_iter()
            .map(|speaker| (speaker, convention.ear_pair(speaker)))
            .collect();

        if entries.is_empty() {
            return Err(PresetError::NoInputChannels);
        }
        for (_, ears) in &entries {
            for index in [ears.left, ears.right] {
                if index >= hrir_channels {
                    return Err(PresetError::InvalidChannelMap {
                        index,
                        channels: hrir_channels,
                    });
                }
            }
        }

        Ok(Self {
            layout,
            convention,
            entries,
        })
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
    }

    pub fn convention(&self) -> HrirConvention {
        self.convention
    }

    /// `(speaker, ears)` per input channel
    pub fn entries(&self) -> &[(Speaker, EarPair)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
