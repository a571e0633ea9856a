//! Media Codec Negotiation
//!
//! Only the capability metadata of codecs lives here: codec type identifiers,
//! the SBC information element, capability intersection, and selection of
//! one concrete configuration out of two capability sets. Sample encoding
//! and decoding happen elsewhere.

use crate::endpoint::capability::{Capabilities, Capability, ServiceCategory};
use crate::endpoint::MediaType;
use crate::error::AvdtpError;

/// Audio codec types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecType {
    /// SBC (Sub-Band Coding), mandatory for A2DP
    Sbc,
    /// MPEG-1,2 Audio
    Mpeg12Audio,
    /// MPEG-2,4 AAC
    Mpeg24Aac,
    /// ATRAC family
    Atrac,
    /// Vendor specific codec
    VendorSpecific,
    /// Reserved codec type received from a peer
    Other(u8),
}

impl From<u8> for CodecType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Sbc,
            0x01 => Self::Mpeg12Audio,
            0x02 => Self::Mpeg24Aac,
            0x04 => Self::Atrac,
            0xFF => Self::VendorSpecific,
            other => Self::Other(other),
        }
    }
}

impl From<CodecType> for u8 {
    fn from(codec_type: CodecType) -> Self {
        match codec_type {
            CodecType::Sbc => 0x00,
            CodecType::Mpeg12Audio => 0x01,
            CodecType::Mpeg24Aac => 0x02,
            CodecType::Atrac => 0x04,
            CodecType::VendorSpecific => 0xFF,
            CodecType::Other(other) => other,
        }
    }
}

/// Length of the SBC codec information element
pub const SBC_INFO_LEN: usize = 4;

/// Smallest bitpool value SBC allows
pub const SBC_MIN_BITPOOL: u8 = 2;

/// Largest bitpool value SBC allows
pub const SBC_MAX_BITPOOL: u8 = 250;

/// SBC (Sub-Band Coding) Codec Capabilities
///
/// As a capability every field is a bitfield of supported values. As a
/// configuration each bitfield has exactly one bit set.
///
/// ```text
/// octet 0: sampling frequency (7-4) | channel mode (3-0)
/// octet 1: block length (7-4) | subbands (3-2) | allocation method (1-0)
/// octet 2: minimum bitpool
/// octet 3: maximum bitpool
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcCapabilities {
    /// Sampling frequency support (bitfield)
    pub sampling_frequencies: SbcSamplingFrequency,
    /// Channel mode support (bitfield)
    pub channel_modes: SbcChannelMode,
    /// Block length support (bitfield)
    pub block_lengths: SbcBlockLength,
    /// Subbands support (bitfield)
    pub subbands: SbcSubbands,
    /// Allocation method support (bitfield)
    pub allocation_methods: SbcAllocationMethod,
    /// Minimum bitpool value (2-250)
    pub min_bitpool: u8,
    /// Maximum bitpool value (2-250)
    pub max_bitpool: u8,
}

/// SBC Sampling Frequency Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcSamplingFrequency(pub u8);

impl SbcSamplingFrequency {
    /// 16000 Hz
    pub const HZ_16000: u8 = 0x08;
    /// 32000 Hz
    pub const HZ_32000: u8 = 0x04;
    /// 44100 Hz
    pub const HZ_44100: u8 = 0x02;
    /// 48000 Hz
    pub const HZ_48000: u8 = 0x01;

    /// Selection order when several frequencies are possible
    const PREFERENCE: [u8; 4] = [Self::HZ_44100, Self::HZ_48000, Self::HZ_32000, Self::HZ_16000];

    /// All frequencies supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::HZ_16000 | Self::HZ_32000 | Self::HZ_44100 | Self::HZ_48000)
    }

    /// 44.1kHz and 48kHz, the two every sink must accept
    #[must_use]
    pub const fn standard() -> Self {
        Self(Self::HZ_44100 | Self::HZ_48000)
    }

    /// Check if frequency is supported
    #[must_use]
    pub const fn supports(&self, freq: u8) -> bool {
        (self.0 & freq) != 0
    }

    /// Frequency in Hz of a single-bit configuration
    #[must_use]
    pub const fn hz(&self) -> Option<u32> {
        match self.0 {
            Self::HZ_16000 => Some(16_000),
            Self::HZ_32000 => Some(32_000),
            Self::HZ_44100 => Some(44_100),
            Self::HZ_48000 => Some(48_000),
            _ => None,
        }
    }
}

/// SBC Channel Mode Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcChannelMode(pub u8);

impl SbcChannelMode {
    /// Mono
    pub const MONO: u8 = 0x08;
    /// Dual Channel
    pub const DUAL_CHANNEL: u8 = 0x04;
    /// Stereo
    pub const STEREO: u8 = 0x02;
    /// Joint Stereo
    pub const JOINT_STEREO: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [
        Self::JOINT_STEREO,
        Self::STEREO,
        Self::DUAL_CHANNEL,
        Self::MONO,
    ];

    /// All modes supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::MONO | Self::DUAL_CHANNEL | Self::STEREO | Self::JOINT_STEREO)
    }

    /// Stereo modes only
    #[must_use]
    pub const fn stereo() -> Self {
        Self(Self::STEREO | Self::JOINT_STEREO)
    }

    /// Check if mode is supported
    #[must_use]
    pub const fn supports(&self, mode: u8) -> bool {
        (self.0 & mode) != 0
    }
}

/// SBC Block Length Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcBlockLength(pub u8);

impl SbcBlockLength {
    /// 4 blocks
    pub const BLOCKS_4: u8 = 0x08;
    /// 8 blocks
    pub const BLOCKS_8: u8 = 0x04;
    /// 12 blocks
    pub const BLOCKS_12: u8 = 0x02;
    /// 16 blocks
    pub const BLOCKS_16: u8 = 0x01;

    const PREFERENCE: [u8; 4] = [
        Self::BLOCKS_16,
        Self::BLOCKS_12,
        Self::BLOCKS_8,
        Self::BLOCKS_4,
    ];

    /// All block lengths supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::BLOCKS_4 | Self::BLOCKS_8 | Self::BLOCKS_12 | Self::BLOCKS_16)
    }

    /// 8 and 16 blocks
    #[must_use]
    pub const fn standard() -> Self {
        Self(Self::BLOCKS_8 | Self::BLOCKS_16)
    }

    /// Check if block length is supported
    #[must_use]
    pub const fn supports(&self, blocks: u8) -> bool {
        (self.0 & blocks) != 0
    }
}

/// SBC Subbands Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcSubbands(pub u8);

impl SbcSubbands {
    /// 4 subbands
    pub const SUBBANDS_4: u8 = 0x02;
    /// 8 subbands
    pub const SUBBANDS_8: u8 = 0x01;

    const PREFERENCE: [u8; 2] = [Self::SUBBANDS_8, Self::SUBBANDS_4];

    /// All subband counts supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SUBBANDS_4 | Self::SUBBANDS_8)
    }

    /// 8 subbands only
    #[must_use]
    pub const fn high_quality() -> Self {
        Self(Self::SUBBANDS_8)
    }

    /// Check if subband count is supported
    #[must_use]
    pub const fn supports(&self, subbands: u8) -> bool {
        (self.0 & subbands) != 0
    }
}

/// SBC Allocation Method Support (bitfield)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SbcAllocationMethod(pub u8);

impl SbcAllocationMethod {
    /// SNR allocation method
    pub const SNR: u8 = 0x02;
    /// Loudness allocation method
    pub const LOUDNESS: u8 = 0x01;

    const PREFERENCE: [u8; 2] = [Self::LOUDNESS, Self::SNR];

    /// All allocation methods supported
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::SNR | Self::LOUDNESS)
    }

    /// Loudness only
    #[must_use]
    pub const fn loudness() -> Self {
        Self(Self::LOUDNESS)
    }

    /// Check if allocation method is supported
    #[must_use]
    pub const fn supports(&self, method: u8) -> bool {
        (self.0 & method) != 0
    }
}

/// First preferred bit present in both bitfields
fn pick(preference: &[u8], ours: u8, theirs: u8) -> Option<u8> {
    preference
        .iter()
        .copied()
        .find(|bit| ours & theirs & bit != 0)
}

const fn single_bit(value: u8) -> bool {
    value.count_ones() == 1
}

impl SbcCapabilities {
    /// 44.1/48kHz stereo with 8 subbands and bitpool 2-53
    #[must_use]
    pub const fn high_quality() -> Self {
        Self {
            sampling_frequencies: SbcSamplingFrequency::standard(),
            channel_modes: SbcChannelMode::stereo(),
            block_lengths: SbcBlockLength::standard(),
            subbands: SbcSubbands::high_quality(),
            allocation_methods: SbcAllocationMethod::loudness(),
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: 53,
        }
    }

    /// Validate SBC capabilities
    ///
    /// # Errors
    /// Returns error if a bitfield is empty or the bitpool range is invalid
    pub const fn validate(&self) -> Result<(), AvdtpError> {
        const INVALID: AvdtpError = AvdtpError::InvalidParameter(ServiceCategory::MediaCodec);

        if self.sampling_frequencies.0 == 0
            || self.channel_modes.0 == 0
            || self.block_lengths.0 == 0
            || self.subbands.0 == 0
            || self.allocation_methods.0 == 0
        {
            return Err(INVALID);
        }
        if self.min_bitpool < SBC_MIN_BITPOOL || self.min_bitpool > SBC_MAX_BITPOOL {
            return Err(INVALID);
        }
        if self.max_bitpool < SBC_MIN_BITPOOL || self.max_bitpool > SBC_MAX_BITPOOL {
            return Err(INVALID);
        }
        if self.min_bitpool > self.max_bitpool {
            return Err(INVALID);
        }
        Ok(())
    }

    /// Encode the 4-byte codec information element
    #[must_use]
    pub const fn encode(&self) -> [u8; SBC_INFO_LEN] {
        [
            (self.sampling_frequencies.0 << 4) | (self.channel_modes.0 & 0x0F),
            (self.block_lengths.0 << 4)
                | ((self.subbands.0 & 0x03) << 2)
                | (self.allocation_methods.0 & 0x03),
            self.min_bitpool,
            self.max_bitpool,
        ]
    }

    /// Parse a codec information element
    ///
    /// # Errors
    /// Returns error if the element is not exactly 4 bytes long
    pub fn parse(info: &[u8]) -> Result<Self, AvdtpError> {
        let &[octet0, octet1, min_bitpool, max_bitpool] = info else {
            return Err(AvdtpError::InvalidParameter(ServiceCategory::MediaCodec));
        };
        Ok(Self {
            sampling_frequencies: SbcSamplingFrequency(octet0 >> 4),
            channel_modes: SbcChannelMode(octet0 & 0x0F),
            block_lengths: SbcBlockLength(octet1 >> 4),
            subbands: SbcSubbands((octet1 >> 2) & 0x03),
            allocation_methods: SbcAllocationMethod(octet1 & 0x03),
            min_bitpool,
            max_bitpool,
        })
    }

    /// Media codec capability carrying this information element
    ///
    /// # Errors
    /// Returns error if the element does not fit the information budget
    pub fn to_capability(&self) -> Result<Capability, AvdtpError> {
        Capability::media_codec(MediaType::Audio, CodecType::Sbc, &self.encode())
    }

    /// Check if this capability set is compatible with another
    #[must_use]
    pub const fn is_compatible_with(&self, other: &Self) -> bool {
        (self.sampling_frequencies.0 & other.sampling_frequencies.0) != 0
            && (self.channel_modes.0 & other.channel_modes.0) != 0
            && (self.block_lengths.0 & other.block_lengths.0) != 0
            && (self.subbands.0 & other.subbands.0) != 0
            && (self.allocation_methods.0 & other.allocation_methods.0) != 0
            && self.max_bitpool >= other.min_bitpool
            && self.min_bitpool <= other.max_bitpool
    }

    /// Whether `config` is a single concrete configuration these capabilities allow
    #[must_use]
    pub const fn accepts_configuration(&self, config: &Self) -> bool {
        single_bit(config.sampling_frequencies.0)
            && single_bit(config.channel_modes.0)
            && single_bit(config.block_lengths.0)
            && single_bit(config.subbands.0)
            && single_bit(config.allocation_methods.0)
            && self.is_compatible_with(config)
            && config.min_bitpool <= config.max_bitpool
    }

    /// Pick one concrete configuration both sides support
    ///
    /// Returns `None` if the capabilities do not overlap.
    #[must_use]
    pub fn negotiate(&self, remote: &Self) -> Option<Self> {
        let min_bitpool = self.min_bitpool.max(remote.min_bitpool);
        let max_bitpool = self.max_bitpool.min(remote.max_bitpool);
        if min_bitpool > max_bitpool {
            return None;
        }

        Some(Self {
            sampling_frequencies: SbcSamplingFrequency(pick(
                &SbcSamplingFrequency::PREFERENCE,
                self.sampling_frequencies.0,
                remote.sampling_frequencies.0,
            )?),
            channel_modes: SbcChannelMode(pick(
                &SbcChannelMode::PREFERENCE,
                self.channel_modes.0,
                remote.channel_modes.0,
            )?),
            block_lengths: SbcBlockLength(pick(
                &SbcBlockLength::PREFERENCE,
                self.block_lengths.0,
                remote.block_lengths.0,
            )?),
            subbands: SbcSubbands(pick(
                &SbcSubbands::PREFERENCE,
                self.subbands.0,
                remote.subbands.0,
            )?),
            allocation_methods: SbcAllocationMethod(pick(
                &SbcAllocationMethod::PREFERENCE,
                self.allocation_methods.0,
                remote.allocation_methods.0,
            )?),
            min_bitpool,
            max_bitpool,
        })
    }
}

impl Default for SbcCapabilities {
    fn default() -> Self {
        Self {
            sampling_frequencies: SbcSamplingFrequency::all(),
            channel_modes: SbcChannelMode::all(),
            block_lengths: SbcBlockLength::all(),
            subbands: SbcSubbands::all(),
            allocation_methods: SbcAllocationMethod::all(),
            min_bitpool: SBC_MIN_BITPOOL,
            max_bitpool: 53,
        }
    }
}

/// Whether a proposed codec configuration fits a locally registered codec capability
#[must_use]
pub fn configuration_supported(local: &Capabilities, proposed: &Capabilities) -> bool {
    let (Some(local_type), Some(proposed_type)) = (local.codec_type(), proposed.codec_type())
    else {
        return false;
    };
    if local_type != proposed_type {
        return false;
    }
    if local_type != CodecType::Sbc {
        return true;
    }

    let local_sbc = local.codec_info().map(SbcCapabilities::parse);
    let proposed_sbc = proposed.codec_info().map(SbcCapabilities::parse);
    match (local_sbc, proposed_sbc) {
        (Some(Ok(local_sbc)), Some(Ok(proposed_sbc))) => {
            local_sbc.accepts_configuration(&proposed_sbc)
        }
        _ => false,
    }
}

/// Build the configuration an initiator proposes for a remote endpoint
///
/// The result always carries media transport and the codec; delay reporting
/// and content protection are added when both sides list them.
///
/// # Errors
/// Returns [`AvdtpError::NoCommonConfiguration`] if the codecs differ or
/// their parameters do not overlap
pub fn select_configuration(
    local: &Capabilities,
    remote: &Capabilities,
) -> Result<Capabilities, AvdtpError> {
    let (
        Some(Capability::MediaCodec {
            media_type,
            codec_type,
            info: local_info,
        }),
        Some(Capability::MediaCodec {
            media_type: remote_media_type,
            codec_type: remote_codec_type,
            info: remote_info,
        }),
    ) = (
        local.get(ServiceCategory::MediaCodec),
        remote.get(ServiceCategory::MediaCodec),
    )
    else {
        return Err(AvdtpError::NoCommonConfiguration);
    };
    if codec_type != remote_codec_type || media_type != remote_media_type {
        return Err(AvdtpError::NoCommonConfiguration);
    }

    let codec = if *codec_type == CodecType::Sbc {
        let ours = SbcCapabilities::parse(local_info)?;
        let theirs =
            SbcCapabilities::parse(remote_info).map_err(|_| AvdtpError::NoCommonConfiguration)?;
        ours.negotiate(&theirs)
            .ok_or(AvdtpError::NoCommonConfiguration)?
            .to_capability()?
    } else {
        Capability::media_codec(*media_type, *codec_type, remote_info)?
    };

    let mut config = Capabilities::new();
    config.insert(Capability::MediaTransport)?;
    config.insert(codec)?;
    if local.contains(ServiceCategory::DelayReporting)
        && remote.contains(ServiceCategory::DelayReporting)
    {
        config.insert(Capability::DelayReporting)?;
    }
    if let (
        Some(Capability::ContentProtection { cp_type, value }),
        Some(Capability::ContentProtection {
            cp_type: remote_cp_type,
            ..
        }),
    ) = (
        local.get(ServiceCategory::ContentProtection),
        remote.get(ServiceCategory::ContentProtection),
    ) && cp_type == remote_cp_type
    {
        config.insert(Capability::ContentProtection {
            cp_type: *cp_type,
            value: value.clone(),
        })?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sbc_caps(sbc: &SbcCapabilities) -> Capabilities {
        let mut caps = Capabilities::new();
        caps.insert(Capability::MediaTransport).unwrap();
        caps.insert(sbc.to_capability().unwrap()).unwrap();
        caps
    }

    #[test]
    fn test_sbc_sampling_frequency() {
        let freq = SbcSamplingFrequency::standard();
        assert!(freq.supports(SbcSamplingFrequency::HZ_44100));
        assert!(freq.supports(SbcSamplingFrequency::HZ_48000));
        assert!(!freq.supports(SbcSamplingFrequency::HZ_16000));
        assert_eq!(SbcSamplingFrequency(SbcSamplingFrequency::HZ_44100).hz(), Some(44_100));
        assert_eq!(freq.hz(), None);
    }

    #[test]
    fn test_sbc_capabilities_validation() {
        let mut caps = SbcCapabilities::default();
        assert!(caps.validate().is_ok());

        caps.min_bitpool = 1;
        assert!(caps.validate().is_err());

        caps.min_bitpool = 32;
        caps.max_bitpool = 16;
        assert!(caps.validate().is_err());

        let empty = SbcCapabilities {
            subbands: SbcSubbands(0),
            ..SbcCapabilities::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_sbc_information_element_layout() {
        let caps = SbcCapabilities::default();
        assert_eq!(caps.encode(), [0xFF, 0xFF, 0x02, 0x35]);

        let config = SbcCapabilities {
            sampling_frequencies: SbcSamplingFrequency(SbcSamplingFrequency::HZ_44100),
            channel_modes: SbcChannelMode(SbcChannelMode::JOINT_STEREO),
            block_lengths: SbcBlockLength(SbcBlockLength::BLOCKS_16),
            subbands: SbcSubbands(SbcSubbands::SUBBANDS_8),
            allocation_methods: SbcAllocationMethod(SbcAllocationMethod::LOUDNESS),
            min_bitpool: 2,
            max_bitpool: 53,
        };
        let bytes = config.encode();
        assert_eq!(bytes, [0x21, 0x15, 0x02, 0x35]);
        assert_eq!(SbcCapabilities::parse(&bytes).unwrap(), config);
        assert!(SbcCapabilities::parse(&bytes[..3]).is_err());
    }

    #[test]
    fn test_sbc_compatibility() {
        let caps1 = SbcCapabilities::high_quality();
        let caps2 = SbcCapabilities::default();

        assert!(caps1.is_compatible_with(&caps2));
        assert!(caps2.is_compatible_with(&caps1));
    }

    #[test]
    fn test_sbc_negotiation_picks_single_values() {
        let local = SbcCapabilities::default();
        let remote = SbcCapabilities {
            sampling_frequencies: SbcSamplingFrequency(SbcSamplingFrequency::HZ_48000),
            min_bitpool: 10,
            max_bitpool: 40,
            ..SbcCapabilities::default()
        };

        let config = local.negotiate(&remote).unwrap();
        assert_eq!(config.sampling_frequencies.0, SbcSamplingFrequency::HZ_48000);
        assert_eq!(config.channel_modes.0, SbcChannelMode::JOINT_STEREO);
        assert_eq!(config.block_lengths.0, SbcBlockLength::BLOCKS_16);
        assert_eq!(config.subbands.0, SbcSubbands::SUBBANDS_8);
        assert_eq!(config.allocation_methods.0, SbcAllocationMethod::LOUDNESS);
        assert_eq!((config.min_bitpool, config.max_bitpool), (10, 40));
        assert!(local.accepts_configuration(&config));
        assert!(remote.accepts_configuration(&config));
        // A capability with several bits set is not a configuration
        assert!(!local.accepts_configuration(&remote));
    }

    #[test]
    fn test_sbc_negotiation_without_overlap() {
        let local = SbcCapabilities {
            subbands: SbcSubbands(SbcSubbands::SUBBANDS_4),
            ..SbcCapabilities::default()
        };
        let remote = SbcCapabilities::high_quality();
        assert_eq!(local.negotiate(&remote), None);
    }

    #[test]
    fn test_select_configuration() {
        let mut local = sbc_caps(&SbcCapabilities::default());
        local.insert(Capability::DelayReporting).unwrap();
        let remote = sbc_caps(&SbcCapabilities::high_quality());

        let config = select_configuration(&local, &remote).unwrap();
        assert!(config.contains(ServiceCategory::MediaTransport));
        assert!(!config.contains(ServiceCategory::DelayReporting));
        assert!(configuration_supported(&local, &config));
        assert!(configuration_supported(&remote, &config));
    }

    #[test]
    fn test_select_configuration_codec_mismatch() {
        let local = sbc_caps(&SbcCapabilities::default());
        let mut remote = Capabilities::new();
        remote
            .insert(Capability::media_codec(MediaType::Audio, CodecType::Mpeg24Aac, &[0; 6]).unwrap())
            .unwrap();
        assert_eq!(
            select_configuration(&local, &remote),
            Err(AvdtpError::NoCommonConfiguration)
        );
    }

    #[test]
    fn test_codec_type_conversion() {
        assert_eq!(CodecType::from(0x00), CodecType::Sbc);
        assert_eq!(CodecType::from(0x04), CodecType::Atrac);
        assert_eq!(CodecType::from(0x33), CodecType::Other(0x33));
        assert_eq!(u8::from(CodecType::VendorSpecific), 0xFF);
    }
}
