//! Channels: one signal line of a device.
//!
//! A [`Channel`] is a cheap handle (device handle plus position) into the
//! owning context's arena. Its static description lives in a
//! [`ChannelDesc`]; the channel type and modifier are derived from the
//! channel id when the context is built.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::context::ChannelEntry;
use crate::device::{parse_long, Device};
use crate::error::{IioError, Result};
use crate::mask::ChannelsMask;

/// Maximum size of a textual attribute value.
pub const ATTR_BUF_SIZE: usize = 4096;

/// Arbitrary data attached to a channel or device by the application.
pub type UserData = Arc<dyn Any + Send + Sync>;

// ============================================================================
// Data format
// ============================================================================

/// Layout of one sample of a scan element.
///
/// Textual form: `[bl]e:[sSuU]<bits>/<length>[X<repeat>]>><shift>`, for
/// example `le:s12/16>>4`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataFormat {
    /// Storage size of one element in bits
    pub length: u32,
    /// Number of valid bits
    pub bits: u32,
    /// Right shift to apply before the valid bits are reached
    pub shift: u32,
    /// Two's complement sample
    pub is_signed: bool,
    /// All `length` bits are meaningful; no masking or sign extension
    pub is_fully_defined: bool,
    /// Big endian on the wire
    pub is_be: bool,
    /// Number of elements per sample
    pub repeat: u32,
    /// Optional linear scale to apply to converted values
    pub scale: Option<f64>,
}

impl Default for DataFormat {
    fn default() -> Self {
        Self {
            length: 0,
            bits: 0,
            shift: 0,
            is_signed: false,
            is_fully_defined: false,
            is_be: false,
            repeat: 1,
            scale: None,
        }
    }
}

impl DataFormat {
    /// Bytes per element.
    pub fn element_bytes(&self) -> usize {
        (self.length / 8) as usize
    }

    /// Bytes per sample (all repeats).
    pub fn sample_bytes(&self) -> usize {
        self.element_bytes() * self.repeat.max(1) as usize
    }

    /// Convert one hardware sample in `src` into host format in `dst`.
    ///
    /// Applies byte swapping, the shift, and sign extension or masking of
    /// the unused upper bits. Both slices must hold
    /// [`sample_bytes`](Self::sample_bytes) bytes; extra bytes are ignored.
    pub fn convert(&self, dst: &mut [u8], src: &[u8]) {
        let len = self.element_bytes();
        if len == 0 {
            return;
        }
        let elements = dst
            .chunks_exact_mut(len)
            .zip(src.chunks_exact(len))
            .take(self.repeat.max(1) as usize);

        for (dst, src) in elements {
            if len > 8 {
                copy_swapped(dst, src, self.is_be != cfg!(target_endian = "big"));
                continue;
            }
            let mut value = load(src, self.is_be) >> self.shift.min(63);
            if !self.is_fully_defined && self.bits > 0 && self.bits < 64 {
                value = if self.is_signed {
                    let unused = 64 - self.bits;
                    (((value << unused) as i64) >> unused) as u64
                } else {
                    value & ((1u64 << self.bits) - 1)
                };
            }
            store(dst, value, cfg!(target_endian = "big"));
        }
    }

    /// Inverse of [`convert`](Self::convert): host value to hardware layout.
    pub fn convert_inverse(&self, dst: &mut [u8], src: &[u8]) {
        let len = self.element_bytes();
        if len == 0 {
            return;
        }
        let elements = dst
            .chunks_exact_mut(len)
            .zip(src.chunks_exact(len))
            .take(self.repeat.max(1) as usize);

        for (dst, src) in elements {
            if len > 8 {
                copy_swapped(dst, src, self.is_be != cfg!(target_endian = "big"));
                continue;
            }
            let mut value = load(src, cfg!(target_endian = "big"));
            if !self.is_fully_defined && self.bits > 0 && self.bits < 64 {
                value &= (1u64 << self.bits) - 1;
            }
            value <<= self.shift.min(63);
            store(dst, value, self.is_be);
        }
    }
}

fn load(src: &[u8], big_endian: bool) -> u64 {
    let mut bytes = [0u8; 8];
    if big_endian {
        bytes[8 - src.len()..].copy_from_slice(src);
        u64::from_be_bytes(bytes)
    } else {
        bytes[..src.len()].copy_from_slice(src);
        u64::from_le_bytes(bytes)
    }
}

fn store(dst: &mut [u8], value: u64, big_endian: bool) {
    let len = dst.len();
    if big_endian {
        dst.copy_from_slice(&value.to_be_bytes()[8 - len..]);
    } else {
        dst.copy_from_slice(&value.to_le_bytes()[..len]);
    }
}

fn copy_swapped(dst: &mut [u8], src: &[u8], swap: bool) {
    dst.copy_from_slice(src);
    if swap {
        dst.reverse();
    }
}

impl FromStr for DataFormat {
    type Err = IioError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || IioError::invalid(format!("invalid data format '{s}'"));

        let (endian, rest) = s.split_once("e:").ok_or_else(bad)?;
        let is_be = match endian {
            "b" => true,
            "l" => false,
            _ => return Err(bad()),
        };

        let mut chars = rest.chars();
        let sign = chars.next().ok_or_else(bad)?;
        if !matches!(sign, 's' | 'S' | 'u' | 'U') {
            return Err(bad());
        }
        let rest = chars.as_str();

        let (bits, rest) = rest.split_once('/').ok_or_else(bad)?;
        let (sizes, shift) = rest.split_once(">>").ok_or_else(bad)?;
        let (length, repeat) = match sizes.split_once('X') {
            Some((length, repeat)) => (length, Some(repeat)),
            None => (sizes, None),
        };

        let bits: u32 = bits.parse().map_err(|_| bad())?;
        let length: u32 = length.parse().map_err(|_| bad())?;
        let shift: u32 = shift.parse().map_err(|_| bad())?;
        let repeat: u32 = match repeat {
            Some(r) => r.parse().map_err(|_| bad())?,
            None => 1,
        };

        Ok(Self {
            length,
            bits,
            shift,
            is_signed: matches!(sign, 's' | 'S'),
            is_fully_defined: matches!(sign, 'S' | 'U') || bits == length,
            is_be,
            repeat,
            scale: None,
        })
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match (self.is_signed, self.is_fully_defined) {
            (true, true) => 'S',
            (true, false) => 's',
            (false, true) => 'U',
            (false, false) => 'u',
        };
        write!(
            f,
            "{}e:{}{}/{}",
            if self.is_be { 'b' } else { 'l' },
            sign,
            self.bits,
            self.length
        )?;
        if self.repeat > 1 {
            write!(f, "X{}", self.repeat)?;
        }
        write!(f, ">>{}", self.shift)
    }
}

// ============================================================================
// Channel type and modifier
// ============================================================================

/// Physical quantity measured by a channel.
///
/// Discriminants follow the kernel's `iio_chan_type` numbering, which is
/// also what event codes carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ChannelType {
    Voltage,
    Current,
    Power,
    Accel,
    AnglVel,
    Magn,
    Light,
    Intensity,
    Proximity,
    Temp,
    Incli,
    Rot,
    Angl,
    Timestamp,
    Capacitance,
    AltVoltage,
    Cct,
    Pressure,
    HumidityRelative,
    Activity,
    Steps,
    Energy,
    Distance,
    Velocity,
    Concentration,
    Resistance,
    Ph,
    UvIndex,
    ElectricalConductivity,
    Count,
    Index,
    Gravity,
    PositionRelative,
    Phase,
    MassConcentration,
    DeltaAngl,
    DeltaVelocity,
    ColorTemp,
    Chromaticity,
    Attention,
    /// Id did not start with a known type name
    Unknown,
}

const CHANNEL_TYPES: [(ChannelType, &str); 40] = [
    (ChannelType::Voltage, "voltage"),
    (ChannelType::Current, "current"),
    (ChannelType::Power, "power"),
    (ChannelType::Accel, "accel"),
    (ChannelType::AnglVel, "anglvel"),
    (ChannelType::Magn, "magn"),
    (ChannelType::Light, "illuminance"),
    (ChannelType::Intensity, "intensity"),
    (ChannelType::Proximity, "proximity"),
    (ChannelType::Temp, "temp"),
    (ChannelType::Incli, "incli"),
    (ChannelType::Rot, "rot"),
    (ChannelType::Angl, "angl"),
    (ChannelType::Timestamp, "timestamp"),
    (ChannelType::Capacitance, "capacitance"),
    (ChannelType::AltVoltage, "altvoltage"),
    (ChannelType::Cct, "cct"),
    (ChannelType::Pressure, "pressure"),
    (ChannelType::HumidityRelative, "humidityrelative"),
    (ChannelType::Activity, "activity"),
    (ChannelType::Steps, "steps"),
    (ChannelType::Energy, "energy"),
    (ChannelType::Distance, "distance"),
    (ChannelType::Velocity, "velocity"),
    (ChannelType::Concentration, "concentration"),
    (ChannelType::Resistance, "resistance"),
    (ChannelType::Ph, "ph"),
    (ChannelType::UvIndex, "uvindex"),
    (ChannelType::ElectricalConductivity, "electricalconductivity"),
    (ChannelType::Count, "count"),
    (ChannelType::Index, "index"),
    (ChannelType::Gravity, "gravity"),
    (ChannelType::PositionRelative, "positionrelative"),
    (ChannelType::Phase, "phase"),
    (ChannelType::MassConcentration, "massconcentration"),
    (ChannelType::DeltaAngl, "delta_angl"),
    (ChannelType::DeltaVelocity, "delta_velocity"),
    (ChannelType::ColorTemp, "colortemp"),
    (ChannelType::Chromaticity, "chromaticity"),
    (ChannelType::Attention, "attention"),
];

impl ChannelType {
    /// Type for a raw kernel value, as found in event codes.
    pub fn from_raw(raw: u8) -> Option<Self> {
        CHANNEL_TYPES.get(usize::from(raw)).map(|(t, _)| *t)
    }

    /// Kernel name prefix (`"voltage"`, `"accel"`...).
    pub fn name(self) -> Option<&'static str> {
        CHANNEL_TYPES
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, name)| *name)
    }

    /// Derive the type from a channel id such as `voltage0` or `accel_x`.
    ///
    /// The type name must be followed by the end of the id, an underscore,
    /// or a digit.
    pub fn from_channel_id(id: &str) -> Self {
        for (chan_type, name) in CHANNEL_TYPES {
            let Some(rest) = id.strip_prefix(name) else {
                continue;
            };
            match rest.bytes().next() {
                None | Some(b'_') => return chan_type,
                Some(c) if c.is_ascii_digit() => return chan_type,
                _ => {}
            }
        }
        Self::Unknown
    }
}

/// Refinement of a channel type (axis, colour, gas...).
///
/// Discriminants follow the kernel's `iio_modifier` numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Modifier {
    NoMod,
    X,
    Y,
    Z,
    XAndY,
    XAndZ,
    YAndZ,
    XAndYAndZ,
    XOrY,
    XOrZ,
    YOrZ,
    XOrYOrZ,
    LightBoth,
    LightIr,
    RootSumSquaredXY,
    SumSquaredXYZ,
    LightClear,
    LightRed,
    LightGreen,
    LightBlue,
    Quaternion,
    TempAmbient,
    TempObject,
    NorthMagn,
    NorthTrue,
    NorthMagnTiltComp,
    NorthTrueTiltComp,
    Running,
    Jogging,
    Walking,
    Still,
    RootSumSquaredXYZ,
    I,
    Q,
    Co2,
    Voc,
    LightUv,
    LightDuv,
    Pm1,
    Pm2p5,
    Pm4,
    Pm10,
    Ethanol,
    H2,
    O2,
    LinearX,
    LinearY,
    LinearZ,
    Pitch,
    Yaw,
    Roll,
    LightUva,
    LightUvb,
}

// Entry i holds raw value i + 1; NoMod has no name.
const MODIFIERS: [(Modifier, &str); 52] = [
    (Modifier::X, "x"),
    (Modifier::Y, "y"),
    (Modifier::Z, "z"),
    (Modifier::XAndY, "x&y"),
    (Modifier::XAndZ, "x&z"),
    (Modifier::YAndZ, "y&z"),
    (Modifier::XAndYAndZ, "x&y&z"),
    (Modifier::XOrY, "x|y"),
    (Modifier::XOrZ, "x|z"),
    (Modifier::YOrZ, "y|z"),
    (Modifier::XOrYOrZ, "x|y|z"),
    (Modifier::LightBoth, "both"),
    (Modifier::LightIr, "ir"),
    (Modifier::RootSumSquaredXY, "sqrt(x^2+y^2)"),
    (Modifier::SumSquaredXYZ, "x^2+y^2+z^2"),
    (Modifier::LightClear, "clear"),
    (Modifier::LightRed, "red"),
    (Modifier::LightGreen, "green"),
    (Modifier::LightBlue, "blue"),
    (Modifier::Quaternion, "quaternion"),
    (Modifier::TempAmbient, "ambient"),
    (Modifier::TempObject, "object"),
    (Modifier::NorthMagn, "from_north_magnetic"),
    (Modifier::NorthTrue, "from_north_true"),
    (Modifier::NorthMagnTiltComp, "from_north_magnetic_tilt_comp"),
    (Modifier::NorthTrueTiltComp, "from_north_true_tilt_comp"),
    (Modifier::Running, "running"),
    (Modifier::Jogging, "jogging"),
    (Modifier::Walking, "walking"),
    (Modifier::Still, "still"),
    (Modifier::RootSumSquaredXYZ, "sqrt(x^2+y^2+z^2)"),
    (Modifier::I, "i"),
    (Modifier::Q, "q"),
    (Modifier::Co2, "co2"),
    (Modifier::Voc, "voc"),
    (Modifier::LightUv, "uv"),
    (Modifier::LightDuv, "duv"),
    (Modifier::Pm1, "pm1"),
    (Modifier::Pm2p5, "pm2p5"),
    (Modifier::Pm4, "pm4"),
    (Modifier::Pm10, "pm10"),
    (Modifier::Ethanol, "ethanol"),
    (Modifier::H2, "h2"),
    (Modifier::O2, "o2"),
    (Modifier::LinearX, "linear_x"),
    (Modifier::LinearY, "linear_y"),
    (Modifier::LinearZ, "linear_z"),
    (Modifier::Pitch, "pitch"),
    (Modifier::Yaw, "yaw"),
    (Modifier::Roll, "roll"),
    (Modifier::LightUva, "uva"),
    (Modifier::LightUvb, "uvb"),
];

impl Modifier {
    /// Modifier for a raw kernel value, as found in event codes.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::NoMod),
            n => MODIFIERS.get(usize::from(n) - 1).map(|(m, _)| *m),
        }
    }

    /// Kernel name, `None` for [`Modifier::NoMod`].
    pub fn name(self) -> Option<&'static str> {
        MODIFIERS
            .iter()
            .find(|(m, _)| *m == self)
            .map(|(_, name)| *name)
    }

    /// Derive the modifier from the text after the first underscore of a
    /// channel id. The first table entry that prefixes that text wins.
    pub fn from_channel_id(id: &str) -> Self {
        let Some((_, rest)) = id.split_once('_') else {
            return Self::NoMod;
        };
        MODIFIERS
            .iter()
            .find(|(_, name)| rest.starts_with(name))
            .map_or(Self::NoMod, |(m, _)| *m)
    }
}

// ============================================================================
// Description
// ============================================================================

/// A channel attribute name and the file that backs it (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAttr {
    /// Attribute name
    pub name: String,
    /// Backing file name on the target, e.g. `in_voltage0_raw`
    pub filename: Option<String>,
}

impl ChannelAttr {
    /// Attribute with no backing file.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
        }
    }
}

/// Static description of a channel, as produced by a backend or parsed from
/// a topology description.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDesc {
    /// Stable identifier, e.g. `voltage0`
    pub id: String,
    /// Optional human-readable name
    pub name: Option<String>,
    /// Output (DAC) channel
    pub is_output: bool,
    /// Position in the hardware scan; `None` if not a scan element
    pub scan_index: Option<u32>,
    /// Sample layout; meaningful for scan elements only
    pub format: DataFormat,
    /// Channel attributes
    pub attrs: Vec<ChannelAttr>,
}

impl ChannelDesc {
    /// Non-scan channel with no attributes.
    pub fn new(id: impl Into<String>, is_output: bool) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_output,
            scan_index: None,
            format: DataFormat::default(),
            attrs: Vec::new(),
        }
    }

    /// Turn this channel into a scan element.
    pub fn with_scan_element(mut self, index: u32, format: DataFormat) -> Self {
        self.scan_index = Some(index);
        self.format = format;
        self
    }

    /// Append an attribute without a backing file.
    pub fn with_attr(mut self, name: impl Into<String>) -> Self {
        self.attrs.push(ChannelAttr::new(name));
        self
    }

    /// Set the human-readable name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to one channel of a device.
///
/// Cloning is cheap; all clones refer to the same channel.
#[derive(Clone)]
pub struct Channel {
    dev: Device,
    index: usize,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("device", &self.dev.id())
            .field("id", &self.id())
            .field("output", &self.is_output())
            .finish()
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.dev == other.dev && self.index == other.index
    }
}

impl Eq for Channel {}

impl Channel {
    pub(crate) fn new(dev: Device, index: usize) -> Self {
        Self { dev, index }
    }

    fn entry(&self) -> &ChannelEntry {
        &self.dev.entry().channels[self.index]
    }

    /// Owning device.
    pub fn device(&self) -> &Device {
        &self.dev
    }

    /// Position in the device's sorted channel list; also the channel's
    /// bit in a [`ChannelsMask`].
    pub fn number(&self) -> usize {
        self.index
    }

    /// Stable identifier, e.g. `voltage0`.
    pub fn id(&self) -> &str {
        &self.entry().desc.id
    }

    /// Optional human-readable name.
    pub fn name(&self) -> Option<&str> {
        self.entry().desc.name.as_deref()
    }

    /// Whether this is an output channel.
    pub fn is_output(&self) -> bool {
        self.entry().desc.is_output
    }

    /// Whether this channel can take part in buffer capture.
    pub fn is_scan_element(&self) -> bool {
        self.entry().desc.scan_index.is_some()
    }

    /// Scan index, `None` for non-scan channels.
    pub fn scan_index(&self) -> Option<u32> {
        self.entry().desc.scan_index
    }

    /// Sample layout.
    pub fn data_format(&self) -> &DataFormat {
        &self.entry().desc.format
    }

    /// Channel type derived from the id.
    pub fn channel_type(&self) -> ChannelType {
        self.entry().chan_type
    }

    /// Modifier derived from the id.
    pub fn modifier(&self) -> Modifier {
        self.entry().modifier
    }

    /// Channel attributes, sorted by name.
    pub fn attrs(&self) -> &[ChannelAttr] {
        &self.entry().desc.attrs
    }

    /// Look up an attribute by name.
    pub fn find_attr(&self, name: &str) -> Option<&ChannelAttr> {
        self.attrs().iter().find(|a| a.name == name)
    }

    /// Attach application data, replacing any previous value.
    pub fn set_user_data(&self, data: Option<UserData>) {
        *self.entry().user_data.write() = data;
    }

    /// Application data previously attached with
    /// [`set_user_data`](Self::set_user_data).
    pub fn user_data(&self) -> Option<UserData> {
        self.entry().user_data.read().clone()
    }

    // ------------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------------

    /// Read an attribute into `buf`, returning the number of bytes written.
    pub fn read_attr_raw(&self, attr: &str, buf: &mut [u8]) -> Result<usize> {
        self.dev.backend().read_channel_attr(self, attr, buf)
    }

    /// Write raw bytes to an attribute, returning the number of bytes
    /// accepted.
    pub fn write_attr_raw(&self, attr: &str, data: &[u8]) -> Result<usize> {
        self.dev.backend().write_channel_attr(self, attr, data)
    }

    /// Read an attribute as text.
    pub fn read_attr(&self, attr: &str) -> Result<String> {
        let mut buf = vec![0u8; ATTR_BUF_SIZE];
        let len = self.read_attr_raw(attr, &mut buf)?;
        Ok(attr_text(&buf[..len]))
    }

    /// Write a text value. A terminating NUL is sent along with the text.
    pub fn write_attr(&self, attr: &str, value: &str) -> Result<usize> {
        self.write_attr_raw(attr, &nul_terminated(value))
    }

    /// Read an attribute as an integer (decimal, or hex with `0x`).
    pub fn read_attr_i64(&self, attr: &str) -> Result<i64> {
        parse_long(&self.read_attr(attr)?)
    }

    /// Read an attribute as a float.
    pub fn read_attr_f64(&self, attr: &str) -> Result<f64> {
        let text = self.read_attr(attr)?;
        text.trim()
            .parse()
            .map_err(|_| IioError::invalid(format!("'{text}' is not a number")))
    }

    /// Read an attribute as a boolean (non-zero is true).
    pub fn read_attr_bool(&self, attr: &str) -> Result<bool> {
        Ok(self.read_attr_i64(attr)? != 0)
    }

    /// Write an integer attribute.
    pub fn write_attr_i64(&self, attr: &str, value: i64) -> Result<()> {
        self.write_attr(attr, &value.to_string()).map(|_| ())
    }

    /// Write a float attribute.
    pub fn write_attr_f64(&self, attr: &str, value: f64) -> Result<()> {
        self.write_attr(attr, &value.to_string()).map(|_| ())
    }

    /// Write a boolean attribute as `1` or `0`.
    pub fn write_attr_bool(&self, attr: &str, value: bool) -> Result<()> {
        self.write_attr(attr, if value { "1" } else { "0" })
            .map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Buffer selection and sample conversion
    // ------------------------------------------------------------------------

    /// Select this channel in `mask`. Non-scan channels are ignored.
    pub fn enable(&self, mask: &mut ChannelsMask) {
        if self.is_scan_element() {
            mask.set_bit(self.index);
        }
    }

    /// Deselect this channel in `mask`.
    pub fn disable(&self, mask: &mut ChannelsMask) {
        if self.is_scan_element() {
            mask.clear_bit(self.index);
        }
    }

    /// Whether this channel is selected in `mask`.
    pub fn is_enabled(&self, mask: &ChannelsMask) -> bool {
        self.is_scan_element() && mask.test_bit(self.index)
    }

    /// Convert one hardware sample into host format.
    pub fn convert(&self, dst: &mut [u8], src: &[u8]) {
        self.data_format().convert(dst, src);
    }

    /// Convert one host-format sample into hardware layout.
    pub fn convert_inverse(&self, dst: &mut [u8], src: &[u8]) {
        self.data_format().convert_inverse(dst, src);
    }

    /// Copy this channel's samples out of `buf` into `dst`, converted to
    /// host format. Returns the number of bytes written to `dst`.
    pub fn read(&self, buf: &Buffer, dst: &mut [u8]) -> usize {
        self.demux(buf, dst, true)
    }

    /// Copy this channel's samples out of `buf` without conversion.
    pub fn read_raw(&self, buf: &Buffer, dst: &mut [u8]) -> usize {
        self.demux(buf, dst, false)
    }

    fn demux(&self, buf: &Buffer, dst: &mut [u8], convert: bool) -> usize {
        let length = self.data_format().sample_bytes();
        let step = buf.step();
        let Some(first) = buf.first(self) else {
            return 0;
        };
        if length == 0 || step == 0 {
            return 0;
        }

        let data = buf.data();
        let mut written = 0;
        let mut offset = first;
        while offset + length <= data.len() && written + length <= dst.len() {
            let src = &data[offset..offset + length];
            let out = &mut dst[written..written + length];
            if convert {
                self.convert(out, src);
            } else {
                out.copy_from_slice(src);
            }
            offset += step;
            written += length;
        }
        written
    }

    /// Interleave host-format samples from `src` into `buf`. Returns the
    /// number of bytes consumed from `src`.
    pub fn write(&self, buf: &mut Buffer, src: &[u8]) -> usize {
        self.mux(buf, src, true)
    }

    /// Interleave samples from `src` into `buf` without conversion.
    pub fn write_raw(&self, buf: &mut Buffer, src: &[u8]) -> usize {
        self.mux(buf, src, false)
    }

    fn mux(&self, buf: &mut Buffer, src: &[u8], convert: bool) -> usize {
        let length = self.data_format().sample_bytes();
        let step = buf.step();
        let Some(first) = buf.first(self) else {
            return 0;
        };
        if length == 0 || step == 0 {
            return 0;
        }

        let format = *self.data_format();
        let data = buf.data_mut();
        let mut consumed = 0;
        let mut offset = first;
        while offset + length <= data.len() && consumed + length <= src.len() {
            let from = &src[consumed..consumed + length];
            let out = &mut data[offset..offset + length];
            if convert {
                format.convert_inverse(out, from);
            } else {
                out.copy_from_slice(from);
            }
            offset += step;
            consumed += length;
        }
        consumed
    }
}

/// Attribute bytes to text, cut at the first NUL.
pub(crate) fn attr_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end])
        .trim_end_matches('\n')
        .to_string()
}

pub(crate) fn nul_terminated(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 1);
    bytes.extend_from_slice(value.as_bytes());
    bytes.push(0);
    bytes
}
