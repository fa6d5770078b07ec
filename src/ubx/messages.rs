//! UBX messages used by the gateway, one struct per payload layout.
//!
//! Layouts follow the u-blox M8 ADR protocol description. Fields that are
//! packed bitfields on the wire stay raw integers here; their meaning is
//! exposed through accessor methods.

use std::fmt;

use super::registry::{
    FieldType, Purpose, Record, Registry, RegistryError, Schema, UbxMessage, field,
};

pub const CLASS_ACK: u8 = 0x05;
pub const CLASS_CFG: u8 = 0x06;
pub const CLASS_UPD: u8 = 0x09;
pub const CLASS_MON: u8 = 0x0A;
pub const CLASS_ESF: u8 = 0x10;

/// Every message the registry can hand back to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AckAck(AckAck),
    AckNak(AckNak),
    MonVer(MonVer),
    CfgPrtUart(CfgPrtUart),
    CfgNmea(CfgNmea),
    CfgNav5(CfgNav5),
    CfgEsfAlg(CfgEsfAlg),
    CfgEsfla(CfgEsfla),
    EsfAlg(EsfAlg),
    EsfStatus(EsfStatus),
    CfgRst(CfgRst),
    CfgCfg(CfgCfg),
    UpdSos(UpdSos),
    UpdSosStatus(UpdSosStatus),
    /// Any empty or selector-only poll request.
    Poll { class: u8, id: u8 },
}

impl Message {
    pub fn name(&self) -> &'static str {
        match self {
            Message::AckAck(_) => AckAck::SCHEMA.name,
            Message::AckNak(_) => AckNak::SCHEMA.name,
            Message::MonVer(_) => MonVer::SCHEMA.name,
            Message::CfgPrtUart(_) => CfgPrtUart::SCHEMA.name,
            Message::CfgNmea(_) => CfgNmea::SCHEMA.name,
            Message::CfgNav5(_) => CfgNav5::SCHEMA.name,
            Message::CfgEsfAlg(_) => CfgEsfAlg::SCHEMA.name,
            Message::CfgEsfla(_) => CfgEsfla::SCHEMA.name,
            Message::EsfAlg(_) => EsfAlg::SCHEMA.name,
            Message::EsfStatus(_) => EsfStatus::SCHEMA.name,
            Message::CfgRst(_) => CfgRst::SCHEMA.name,
            Message::CfgCfg(_) => CfgCfg::SCHEMA.name,
            Message::UpdSos(_) => UpdSos::SCHEMA.name,
            Message::UpdSosStatus(_) => UpdSosStatus::SCHEMA.name,
            Message::Poll { .. } => "poll",
        }
    }
}

macro_rules! message_variant {
    ($ty:ident) => {
        impl From<$ty> for Message {
            fn from(m: $ty) -> Self {
                Message::$ty(m)
            }
        }

        impl TryFrom<Message> for $ty {
            type Error = Message;

            fn try_from(m: Message) -> Result<Self, Message> {
                match m {
                    Message::$ty(inner) => Ok(inner),
                    other => Err(other),
                }
            }
        }
    };
}

macro_rules! poll_message {
    ($(#[$doc:meta])* $ty:ident, $schema:ident, $name:literal, $class:expr, $id:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $ty;

        pub static $schema: Schema = Schema {
            name: $name,
            class: $class,
            id: $id,
            purpose: Purpose::Poll,
            fields: &[],
            repeated: &[],
        };

        impl UbxMessage for $ty {
            const SCHEMA: &'static Schema = &$schema;

            fn from_record(_: &Record) -> Result<Self, RegistryError> {
                Ok($ty)
            }

            fn to_record(&self) -> Result<Record, RegistryError> {
                Ok(Record::new(Self::SCHEMA))
            }
        }

        impl From<$ty> for Message {
            fn from(_: $ty) -> Self {
                Message::Poll {
                    class: $class,
                    id: $id,
                }
            }
        }
    };
}

/// Declares a message struct, its static schema and both record
/// conversions from a single field list.
///
/// Each entry names the struct field, its Rust type (which fixes the wire
/// kind through [`FieldType`]) and the wire name. A `repeated` clause adds a
/// block struct for the trailing repeated group. With `count = "<name>"` the
/// named fixed field must equal the block count on decode, and is rewritten
/// from the block list on encode.
macro_rules! ubx_message {
    (
        $(#[$meta:meta])*
        $ty:ident: $schema:ident = $name:literal, $class:expr, $id:expr, $purpose:ident {
            $($(#[$fmeta:meta])* $field:ident: $fty:ty = $wire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $ty {
            $($(#[$fmeta])* pub $field: $fty,)+
        }

        pub static $schema: Schema = Schema {
            name: $name,
            class: $class,
            id: $id,
            purpose: Purpose::$purpose,
            fields: &[$(field($wire, <$fty as FieldType>::KIND),)+],
            repeated: &[],
        };

        impl UbxMessage for $ty {
            const SCHEMA: &'static Schema = &$schema;

            fn from_record(r: &Record) -> Result<Self, RegistryError> {
                let f = r.fields();
                Ok(Self {
                    $($field: <$fty as FieldType>::read(f, $wire)?,)+
                })
            }

            fn to_record(&self) -> Result<Record, RegistryError> {
                let mut r = Record::new(Self::SCHEMA);
                let f = r.fields_mut();
                $(f.set($wire, self.$field)?;)+
                Ok(r)
            }
        }
    };
    (
        $(#[$meta:meta])*
        $ty:ident: $schema:ident = $name:literal, $class:expr, $id:expr, $purpose:ident {
            $($(#[$fmeta:meta])* $field:ident: $fty:ty = $wire:literal,)+
        }
        $(#[$bmeta:meta])*
        repeated $blocks:ident: $block:ident $(, count = $count:literal)? {
            $($(#[$bfmeta:meta])* $bfield:ident: $bfty:ty = $bwire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $ty {
            $($(#[$fmeta])* pub $field: $fty,)+
            pub $blocks: Vec<$block>,
        }

        $(#[$bmeta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $block {
            $($(#[$bfmeta])* pub $bfield: $bfty,)+
        }

        pub static $schema: Schema = Schema {
            name: $name,
            class: $class,
            id: $id,
            purpose: Purpose::$purpose,
            fields: &[$(field($wire, <$fty as FieldType>::KIND),)+],
            repeated: &[$(field($bwire, <$bfty as FieldType>::KIND),)+],
        };

        impl UbxMessage for $ty {
            const SCHEMA: &'static Schema = &$schema;

            fn from_record(r: &Record) -> Result<Self, RegistryError> {
                let f = r.fields();
                $(
                    if usize::from(f.u8($count)?) != r.blocks().len() {
                        return Err(RegistryError::Inconsistent {
                            message: $name,
                            reason: concat!($count, " does not match payload length"),
                        });
                    }
                )?
                let $blocks = r
                    .blocks()
                    .iter()
                    .map(|b| {
                        Ok($block {
                            $($bfield: <$bfty as FieldType>::read(b, $bwire)?,)+
                        })
                    })
                    .collect::<Result<_, RegistryError>>()?;
                Ok(Self {
                    $($field: <$fty as FieldType>::read(f, $wire)?,)+
                    $blocks,
                })
            }

            fn to_record(&self) -> Result<Record, RegistryError> {
                let mut r = Record::new(Self::SCHEMA);
                let f = r.fields_mut();
                $(f.set($wire, self.$field)?;)+
                $(
                    let count = u8::try_from(self.$blocks.len())
                        .map_err(|_| RegistryError::OutOfRange { field: $count })?;
                    f.set($count, count)?;
                )?
                for item in &self.$blocks {
                    let b = r.push_block();
                    $(b.set($bwire, item.$bfield)?;)+
                }
                Ok(r)
            }
        }
    };
}

pub(crate) fn register_all(registry: &mut Registry) {
    registry.register::<AckAck>();
    registry.register::<AckNak>();
    registry.register::<MonVerPoll>();
    registry.register::<MonVer>();
    registry.register::<CfgPrtPoll>();
    registry.register::<CfgPrtPortPoll>();
    registry.register::<CfgPrtUart>();
    registry.register::<CfgNmeaPoll>();
    registry.register::<CfgNmea>();
    registry.register::<CfgNav5Poll>();
    registry.register::<CfgNav5>();
    registry.register::<CfgEsfAlgPoll>();
    registry.register::<CfgEsfAlg>();
    registry.register::<CfgEsflaPoll>();
    registry.register::<CfgEsfla>();
    registry.register::<EsfAlgPoll>();
    registry.register::<EsfAlg>();
    registry.register::<EsfStatusPoll>();
    registry.register::<EsfStatus>();
    registry.register::<CfgRst>();
    registry.register::<CfgCfg>();
    registry.register::<UpdSosPoll>();
    registry.register::<UpdSos>();
    registry.register::<UpdSosStatus>();
}

// Fixed-size character fields are NUL padded.
fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Angles in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct Angles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

// Receiver angles are transported in 1e-2 degrees.
fn centi(value: i64) -> f64 {
    value as f64 / 100.0
}

/// 1e-2 degree representation of an angle in degrees, rounded.
pub fn to_centi(degrees: f64) -> i64 {
    (degrees * 100.0).round() as i64
}

// ---------------------------------------------------------------------------
// ACK

ubx_message! {
    /// Positive acknowledgement of a Set/Action message.
    AckAck: ACK_ACK = "ACK-ACK", CLASS_ACK, 0x01, Status {
        class: u8 = "clsID",
        id: u8 = "msgID",
    }
}

ubx_message! {
    /// Negative acknowledgement of a Set/Action message.
    AckNak: ACK_NAK = "ACK-NAK", CLASS_ACK, 0x00, Status {
        class: u8 = "clsID",
        id: u8 = "msgID",
    }
}

message_variant!(AckAck);
message_variant!(AckNak);

// ---------------------------------------------------------------------------
// MON-VER

poll_message!(
    /// Request receiver and software version.
    MonVerPoll, MON_VER_POLL, "MON-VER", CLASS_MON, 0x04
);

ubx_message! {
    /// Receiver and software version.
    ///
    /// Extensions carry `KEY=value` strings such as `FWVER=ADR 4.21` or
    /// `PROTVER=19.20`.
    MonVer: MON_VER = "MON-VER", CLASS_MON, 0x04, Status {
        sw_version: [u8; 30] = "swVersion",
        hw_version: [u8; 10] = "hwVersion",
    }
    repeated extensions: MonVerExtension {
        text: [u8; 30] = "extension",
    }
}

impl MonVer {
    pub fn software_version(&self) -> String {
        text(&self.sw_version)
    }

    pub fn hardware_version(&self) -> String {
        text(&self.hw_version)
    }

    pub fn extensions(&self) -> impl Iterator<Item = String> + '_ {
        self.extensions.iter().map(|e| text(&e.text))
    }

    /// Value of the first `KEY=value` extension with the given key.
    pub fn extension_value(&self, key: &str) -> Option<String> {
        self.extensions().find_map(|ext| {
            let (k, v) = ext.split_once('=')?;
            (k.trim() == key).then(|| v.trim().to_string())
        })
    }
}

message_variant!(MonVer);

// ---------------------------------------------------------------------------
// CFG-PRT

poll_message!(
    /// Request configuration of the port the request arrives on.
    CfgPrtPoll, CFG_PRT_POLL, "CFG-PRT", CLASS_CFG, 0x00
);

ubx_message! {
    /// Request configuration of one specific port.
    CfgPrtPortPoll: CFG_PRT_PORT_POLL = "CFG-PRT", CLASS_CFG, 0x00, Poll {
        port_id: u8 = "portID",
    }
}

impl CfgPrtPortPoll {
    pub const UART1: Self = Self { port_id: 1 };
}

impl From<CfgPrtPortPoll> for Message {
    fn from(_: CfgPrtPortPoll) -> Self {
        Message::Poll {
            class: CLASS_CFG,
            id: 0x00,
        }
    }
}

ubx_message! {
    /// UART port configuration.
    CfgPrtUart: CFG_PRT_UART = "CFG-PRT", CLASS_CFG, 0x00, Status {
        port_id: u8 = "portID",
        reserved1: u8 = "reserved1",
        tx_ready: u16 = "txReady",
        mode: u32 = "mode",
        baud_rate: u32 = "baudRate",
        in_proto_mask: u16 = "inProtoMask",
        out_proto_mask: u16 = "outProtoMask",
        flags: u16 = "flags",
        reserved2: [u8; 2] = "reserved2",
    }
}

impl CfgPrtUart {
    pub fn data_bits(&self) -> u8 {
        5 + ((self.mode >> 6) & 0x03) as u8
    }

    pub fn parity(&self) -> char {
        match (self.mode >> 9) & 0x07 {
            0b000 => 'E',
            0b001 => 'O',
            0b100 | 0b101 => 'N',
            _ => '?',
        }
    }

    pub fn stop_bits(&self) -> &'static str {
        match (self.mode >> 12) & 0x03 {
            0 => "1",
            1 => "1.5",
            2 => "2",
            _ => "0.5",
        }
    }

    /// Character framing in the usual `8N1` notation.
    pub fn mode_string(&self) -> String {
        format!("{}{}{}", self.data_bits(), self.parity(), self.stop_bits())
    }
}

message_variant!(CfgPrtUart);

// ---------------------------------------------------------------------------
// CFG-NMEA

poll_message!(
    /// Request NMEA protocol configuration.
    CfgNmeaPoll, CFG_NMEA_POLL, "CFG-NMEA", CLASS_CFG, 0x17
);

ubx_message! {
    /// NMEA protocol configuration.
    CfgNmea: CFG_NMEA = "CFG-NMEA", CLASS_CFG, 0x17, Set {
        filter: u8 = "filter",
        /// BCD-like: 0x41 is NMEA 4.1.
        nmea_version: u8 = "nmeaVersion",
        num_sv: u8 = "numSV",
        flags: u8 = "flags",
        gnss_to_filter: u32 = "gnssToFilter",
        sv_numbering: u8 = "svNumbering",
        main_talker_id: u8 = "mainTalkerId",
        gsv_talker_id: u8 = "gsvTalkerId",
        version: u8 = "version",
        bds_talker_id: [u8; 2] = "bdsTalkerId",
        reserved1: [u8; 6] = "reserved1",
    }
}

impl CfgNmea {
    /// NMEA version as `major.minor`.
    pub fn version_string(&self) -> String {
        format!("{}.{}", self.nmea_version / 16, self.nmea_version % 16)
    }
}

message_variant!(CfgNmea);

// ---------------------------------------------------------------------------
// CFG-NAV5

poll_message!(
    /// Request navigation engine settings.
    CfgNav5Poll, CFG_NAV5_POLL, "CFG-NAV5", CLASS_CFG, 0x24
);

/// Receiver platform model used by the navigation filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[repr(u8)]
pub enum DynamicModel {
    Portable = 0,
    Stationary = 2,
    Pedestrian = 3,
    Automotive = 4,
    Sea = 5,
    Airborne1g = 6,
    Airborne2g = 7,
    Airborne4g = 8,
    Wrist = 9,
    Bike = 10,
}

impl TryFrom<u8> for DynamicModel {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => DynamicModel::Portable,
            2 => DynamicModel::Stationary,
            3 => DynamicModel::Pedestrian,
            4 => DynamicModel::Automotive,
            5 => DynamicModel::Sea,
            6 => DynamicModel::Airborne1g,
            7 => DynamicModel::Airborne2g,
            8 => DynamicModel::Airborne4g,
            9 => DynamicModel::Wrist,
            10 => DynamicModel::Bike,
            other => return Err(other),
        })
    }
}

impl fmt::Display for DynamicModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DynamicModel::Portable => "portable",
            DynamicModel::Stationary => "stationary",
            DynamicModel::Pedestrian => "pedestrian",
            DynamicModel::Automotive => "automotive",
            DynamicModel::Sea => "sea",
            DynamicModel::Airborne1g => "airborne <1g",
            DynamicModel::Airborne2g => "airborne <2g",
            DynamicModel::Airborne4g => "airborne <4g",
            DynamicModel::Wrist => "wrist",
            DynamicModel::Bike => "bike",
        };
        write!(f, "{} ({})", *self as u8, name)
    }
}

ubx_message! {
    /// Navigation engine settings.
    CfgNav5: CFG_NAV5 = "CFG-NAV5", CLASS_CFG, 0x24, Set {
        /// Which parameters a Set applies.
        mask: u16 = "mask",
        dyn_model: u8 = "dynModel",
        fix_mode: u8 = "fixMode",
        fixed_alt: i32 = "fixedAlt",
        fixed_alt_var: u32 = "fixedAltVar",
        min_elev: i8 = "minElev",
        dr_limit: u8 = "drLimit",
        p_dop: u16 = "pDop",
        t_dop: u16 = "tDop",
        p_acc: u16 = "pAcc",
        t_acc: u16 = "tAcc",
        static_hold_thresh: u8 = "staticHoldThresh",
        dgnss_timeout: u8 = "dgnssTimeout",
        cno_thresh_num_svs: u8 = "cnoThreshNumSVs",
        cno_thresh: u8 = "cnoThresh",
        reserved1: [u8; 2] = "reserved1",
        static_hold_max_dist: u16 = "staticHoldMaxDist",
        utc_standard: u8 = "utcStandard",
        reserved2: [u8; 5] = "reserved2",
    }
}

impl CfgNav5 {
    pub const MASK_DYN_MODEL: u16 = 0x0001;

    pub fn dynamic_model(&self) -> Option<DynamicModel> {
        DynamicModel::try_from(self.dyn_model).ok()
    }

    /// Change only the dynamic model when this message is written back.
    pub fn with_dynamic_model(mut self, model: DynamicModel) -> Self {
        self.dyn_model = model as u8;
        self.mask = Self::MASK_DYN_MODEL;
        self
    }
}

message_variant!(CfgNav5);

// ---------------------------------------------------------------------------
// CFG-ESFALG

poll_message!(
    /// Request IMU mount alignment configuration.
    CfgEsfAlgPoll, CFG_ESFALG_POLL, "CFG-ESFALG", CLASS_CFG, 0x56
);

ubx_message! {
    /// IMU mount misalignment configuration.
    CfgEsfAlg: CFG_ESFALG = "CFG-ESFALG", CLASS_CFG, 0x56, Set {
        bitfield: u32 = "bitfield",
        /// 1e-2 degrees, 0..36000.
        yaw: u32 = "yaw",
        /// 1e-2 degrees.
        pitch: i16 = "pitch",
        /// 1e-2 degrees.
        roll: i16 = "roll",
    }
}

impl CfgEsfAlg {
    pub const DO_AUTO_MNT_ALG: u32 = 1 << 8;

    pub fn auto_alignment(&self) -> bool {
        self.bitfield & Self::DO_AUTO_MNT_ALG != 0
    }

    pub fn set_auto_alignment(&mut self, enable: bool) {
        if enable {
            self.bitfield |= Self::DO_AUTO_MNT_ALG;
        } else {
            self.bitfield &= !Self::DO_AUTO_MNT_ALG;
        }
    }

    pub fn angles(&self) -> Angles {
        Angles {
            roll: centi(self.roll.into()),
            pitch: centi(self.pitch.into()),
            yaw: centi(self.yaw.into()),
        }
    }
}

message_variant!(CfgEsfAlg);

// ---------------------------------------------------------------------------
// CFG-ESFLA

poll_message!(
    /// Request lever arm configuration.
    CfgEsflaPoll, CFG_ESFLA_POLL, "CFG-ESFLA", CLASS_CFG, 0x2F
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LeverArmKind {
    VrpToAntenna = 0,
    VrpToImu = 1,
}

ubx_message! {
    /// Lever arm configuration.
    CfgEsfla: CFG_ESFLA = "CFG-ESFLA", CLASS_CFG, 0x2F, Set {
        version: u8 = "version",
        num_configs: u8 = "numConfigs",
        reserved1: [u8; 2] = "reserved1",
    }
    /// One lever arm, in centimeters.
    repeated configs: LeverArmConfig, count = "numConfigs" {
        kind: u8 = "leverArmType",
        reserved2: u8 = "reserved2",
        x: i16 = "leverArmX",
        y: i16 = "leverArmY",
        z: i16 = "leverArmZ",
    }
}

/// Lever arm distances in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct LeverArm {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LeverArmConfig {
    pub fn meters(&self) -> LeverArm {
        LeverArm {
            x: f64::from(self.x) / 100.0,
            y: f64::from(self.y) / 100.0,
            z: f64::from(self.z) / 100.0,
        }
    }
}

impl CfgEsfla {
    /// Single lever arm update; distances given in centimeters.
    pub fn single(kind: LeverArmKind, x: i16, y: i16, z: i16) -> Self {
        Self {
            version: 0,
            num_configs: 1,
            reserved1: [0; 2],
            configs: vec![LeverArmConfig {
                kind: kind as u8,
                reserved2: 0,
                x,
                y,
                z,
            }],
        }
    }

    pub fn lever_arm(&self, kind: LeverArmKind) -> Option<LeverArmConfig> {
        self.configs.iter().copied().find(|c| c.kind == kind as u8)
    }
}

message_variant!(CfgEsfla);

// ---------------------------------------------------------------------------
// ESF-ALG

poll_message!(
    /// Request IMU alignment state.
    EsfAlgPoll, ESF_ALG_POLL, "ESF-ALG", CLASS_ESF, 0x14
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum AlignmentStatus {
    UserDefined,
    RollPitchOngoing,
    RollPitchYawOngoing,
    Coarse,
    Fine,
    Invalid,
}

impl fmt::Display for AlignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlignmentStatus::UserDefined => "user-defined",
            AlignmentStatus::RollPitchOngoing => "roll-pitch",
            AlignmentStatus::RollPitchYawOngoing => "roll-pitch-yaw",
            AlignmentStatus::Coarse => "coarse",
            AlignmentStatus::Fine => "fine",
            AlignmentStatus::Invalid => "invalid",
        })
    }
}

ubx_message! {
    /// IMU alignment state.
    EsfAlg: ESF_ALG = "ESF-ALG", CLASS_ESF, 0x14, Status {
        itow: u32 = "iTOW",
        version: u8 = "version",
        flags: u8 = "flags",
        error: u8 = "error",
        reserved1: u8 = "reserved1",
        yaw: u32 = "yaw",
        pitch: i16 = "pitch",
        roll: i16 = "roll",
    }
}

impl EsfAlg {
    pub fn auto_alignment_on(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn status(&self) -> AlignmentStatus {
        match (self.flags >> 1) & 0x07 {
            0 => AlignmentStatus::UserDefined,
            1 => AlignmentStatus::RollPitchOngoing,
            2 => AlignmentStatus::RollPitchYawOngoing,
            3 => AlignmentStatus::Coarse,
            4 => AlignmentStatus::Fine,
            _ => AlignmentStatus::Invalid,
        }
    }

    pub fn angles(&self) -> Angles {
        Angles {
            roll: centi(self.roll.into()),
            pitch: centi(self.pitch.into()),
            yaw: centi(self.yaw.into()),
        }
    }
}

message_variant!(EsfAlg);

// ---------------------------------------------------------------------------
// ESF-STATUS

poll_message!(
    /// Request sensor fusion status.
    EsfStatusPoll, ESF_STATUS_POLL, "ESF-STATUS", CLASS_ESF, 0x10
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum InitStatus {
    Off,
    Initializing,
    Initialized,
    Invalid,
}

impl InitStatus {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0 => InitStatus::Off,
            1 => InitStatus::Initializing,
            2 => InitStatus::Initialized,
            _ => InitStatus::Invalid,
        }
    }
}

impl fmt::Display for InitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitStatus::Off => "off",
            InitStatus::Initializing => "initializing",
            InitStatus::Initialized => "initialized",
            InitStatus::Invalid => "invalid",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FusionMode {
    Initializing,
    Fusion,
    Suspended,
    Disabled,
    Unknown(u8),
}

impl fmt::Display for FusionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionMode::Initializing => f.write_str("initializing"),
            FusionMode::Fusion => f.write_str("fusion"),
            FusionMode::Suspended => f.write_str("suspended"),
            FusionMode::Disabled => f.write_str("disabled"),
            FusionMode::Unknown(raw) => write!(f, "unknown ({raw})"),
        }
    }
}

ubx_message! {
    /// Sensor fusion status.
    EsfStatus: ESF_STATUS = "ESF-STATUS", CLASS_ESF, 0x10, Status {
        itow: u32 = "iTOW",
        version: u8 = "version",
        init_status1: u8 = "initStatus1",
        init_status2: u8 = "initStatus2",
        reserved1: [u8; 5] = "reserved1",
        fusion_mode: u8 = "fusionMode",
        reserved2: [u8; 2] = "reserved2",
        num_sens: u8 = "numSens",
    }
    repeated sensors: SensorStatus, count = "numSens" {
        sens_status1: u8 = "sensStatus1",
        sens_status2: u8 = "sensStatus2",
        freq: u8 = "freq",
        faults: u8 = "faults",
    }
}

impl EsfStatus {
    pub fn fusion_mode(&self) -> FusionMode {
        match self.fusion_mode {
            0 => FusionMode::Initializing,
            1 => FusionMode::Fusion,
            2 => FusionMode::Suspended,
            3 => FusionMode::Disabled,
            other => FusionMode::Unknown(other),
        }
    }

    pub fn wheel_tick_status(&self) -> InitStatus {
        InitStatus::from_bits(self.init_status1 & 0x03)
    }

    pub fn mount_alignment_status(&self) -> InitStatus {
        match (self.init_status1 >> 2) & 0x07 {
            0 => InitStatus::Off,
            1 => InitStatus::Initializing,
            2 | 3 => InitStatus::Initialized,
            _ => InitStatus::Invalid,
        }
    }

    pub fn ins_status(&self) -> InitStatus {
        InitStatus::from_bits((self.init_status1 >> 5) & 0x03)
    }

    pub fn imu_status(&self) -> InitStatus {
        InitStatus::from_bits(self.init_status2 & 0x03)
    }
}

message_variant!(EsfStatus);

// ---------------------------------------------------------------------------
// CFG-RST

ubx_message! {
    /// Reset or stop/start the receiver. Never acknowledged.
    CfgRst: CFG_RST = "CFG-RST", CLASS_CFG, 0x04, Action {
        nav_bbr_mask: u16 = "navBbrMask",
        reset_mode: u8 = "resetMode",
        reserved1: u8 = "reserved1",
    }
}

impl CfgRst {
    const fn new(nav_bbr_mask: u16, reset_mode: u8) -> Self {
        Self {
            nav_bbr_mask,
            reset_mode,
            reserved1: 0,
        }
    }

    /// Clear all battery-backed navigation data and restart.
    pub const fn cold_start() -> Self {
        Self::new(0xFFFF, 0x01)
    }

    pub const fn hardware_reset() -> Self {
        Self::new(0x87FF, 0x00)
    }

    /// Controlled GNSS stop.
    pub const fn stop() -> Self {
        Self::new(0x0000, 0x08)
    }

    /// Controlled GNSS start.
    pub const fn start() -> Self {
        Self::new(0x0000, 0x09)
    }
}

message_variant!(CfgRst);

// ---------------------------------------------------------------------------
// CFG-CFG

ubx_message! {
    /// Save, clear or load configuration sections in non-volatile memory.
    CfgCfg: CFG_CFG = "CFG-CFG", CLASS_CFG, 0x09, Action {
        clear_mask: u32 = "clearMask",
        save_mask: u32 = "saveMask",
        load_mask: u32 = "loadMask",
    }
}

impl CfgCfg {
    pub const NAV_CONF: u32 = 0x0000_0008;
    pub const SEN_CONF: u32 = 0x0000_0100;

    pub const fn save(mask: u32) -> Self {
        Self {
            clear_mask: 0,
            save_mask: mask,
            load_mask: 0,
        }
    }

    /// Clear the permanent copy and reload defaults into the active configuration.
    pub const fn reset(mask: u32) -> Self {
        Self {
            clear_mask: mask,
            save_mask: 0,
            load_mask: mask,
        }
    }
}

message_variant!(CfgCfg);

// ---------------------------------------------------------------------------
// UPD-SOS

poll_message!(
    /// Ask whether the last startup restored a backup.
    UpdSosPoll, UPD_SOS_POLL, "UPD-SOS", CLASS_UPD, 0x14
);

ubx_message! {
    /// Save-on-shutdown command.
    UpdSos: UPD_SOS = "UPD-SOS", CLASS_UPD, 0x14, Action {
        cmd: u8 = "cmd",
        reserved1: [u8; 3] = "reserved1",
    }
}

impl UpdSos {
    pub const CMD_SAVE: u8 = 0;
    pub const CMD_CLEAR: u8 = 1;

    /// Create a backup of the receiver state in flash.
    pub const fn save() -> Self {
        Self {
            cmd: Self::CMD_SAVE,
            reserved1: [0; 3],
        }
    }

    /// Clear the backup in flash.
    pub const fn clear() -> Self {
        Self {
            cmd: Self::CMD_CLEAR,
            reserved1: [0; 3],
        }
    }
}

message_variant!(UpdSos);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RestoreState {
    Unknown,
    Failed,
    Restored,
    NoBackup,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestoreState::Unknown => "unknown",
            RestoreState::Failed => "failed restoring from backup",
            RestoreState::Restored => "restored from backup",
            RestoreState::NoBackup => "not restored (no backup)",
        })
    }
}

ubx_message! {
    /// Save-on-shutdown acknowledgement or restore report.
    UpdSosStatus: UPD_SOS_STATUS = "UPD-SOS", CLASS_UPD, 0x14, Status {
        cmd: u8 = "cmd",
        reserved1: [u8; 3] = "reserved1",
        response: u8 = "response",
        reserved2: [u8; 3] = "reserved2",
    }
}

impl UpdSosStatus {
    pub const CMD_BACKUP_ACK: u8 = 2;
    pub const CMD_RESTORE_REPORT: u8 = 3;

    /// True when this acknowledges a successful backup creation.
    pub fn backup_created(&self) -> bool {
        self.cmd == Self::CMD_BACKUP_ACK && self.response == 1
    }

    pub fn restore_state(&self) -> Option<RestoreState> {
        if self.cmd != Self::CMD_RESTORE_REPORT {
            return None;
        }
        Some(match self.response {
            1 => RestoreState::Failed,
            2 => RestoreState::Restored,
            3 => RestoreState::NoBackup,
            _ => RestoreState::Unknown,
        })
    }
}

message_variant!(UpdSosStatus);
