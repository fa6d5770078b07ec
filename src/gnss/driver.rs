//! High level receiver operations on top of a [`UbxLink`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use super::transport::UbxLink;
use crate::ubx::messages::{
    Angles, CfgCfg, CfgEsfAlg, CfgEsfAlgPoll, CfgEsfla, CfgEsflaPoll, CfgNav5, CfgNav5Poll,
    CfgNmea, CfgNmeaPoll, CfgPrtPortPoll, CfgPrtUart, CfgRst, DynamicModel, EsfAlg, EsfAlgPoll,
    EsfStatus, EsfStatusPoll, LeverArm, LeverArmKind, MonVer, MonVerPoll, RestoreState, UpdSos,
    UpdSosPoll, UpdSosStatus, to_centi,
};
use crate::ubx::{Message, UbxMessage};

const NOT_ACCESSIBLE: &str = "Failed: GNSS not accessible.";
const REJECTED: &str = "Failed: GNSS rejected the request.";
const NOT_AVAILABLE: &str = "n/a";
const NO_STATE: &str = "-";

/// Configuration sections affected by save and reset.
const CONFIG_MASK: u32 = CfgCfg::NAV_CONF | CfgCfg::SEN_CONF;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub sw_version: String,
    pub hw_version: String,
    pub fw_version: String,
    pub protocol: String,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            sw_version: NOT_AVAILABLE.to_string(),
            hw_version: NOT_AVAILABLE.to_string(),
            fw_version: NOT_AVAILABLE.to_string(),
            protocol: NOT_AVAILABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UartSettings {
    pub bitrate: u32,
    pub mode: String,
}

impl Default for UartSettings {
    fn default() -> Self {
        Self {
            bitrate: 0,
            mode: NOT_AVAILABLE.to_string(),
        }
    }
}

/// Sensor fusion summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EsfState {
    pub fusion: String,
    pub ins: String,
    pub imu: String,
    #[serde(rename = "imu-align")]
    pub imu_align: String,
}

impl Default for EsfState {
    fn default() -> Self {
        Self {
            fusion: NO_STATE.to_string(),
            ins: NO_STATE.to_string(),
            imu: NO_STATE.to_string(),
            imu_align: NO_STATE.to_string(),
        }
    }
}

impl From<&EsfStatus> for EsfState {
    fn from(status: &EsfStatus) -> Self {
        Self {
            fusion: status.fusion_mode().to_string(),
            ins: status.ins_status().to_string(),
            imu: status.imu_status().to_string(),
            imu_align: status.mount_alignment_status().to_string(),
        }
    }
}

/// Receiver facade with configuration caching.
///
/// Static properties (version, port, NMEA) and configuration messages are
/// read once and cached. Live status (alignment, fusion) is polled on every
/// call. Accessors return placeholder values when the receiver does not
/// answer; mutators return a human readable outcome.
pub struct Gnss<L> {
    link: Arc<L>,
    settle_delay: Duration,
    mon_ver: Option<MonVer>,
    cfg_prt: Option<CfgPrtUart>,
    cfg_nmea: Option<CfgNmea>,
    cfg_nav5: Option<CfgNav5>,
    cfg_esfalg: Option<CfgEsfAlg>,
    cfg_esfla: Option<CfgEsfla>,
}

impl<L: UbxLink> Gnss<L> {
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

    pub fn new(link: Arc<L>) -> Self {
        Self {
            link,
            settle_delay: Self::DEFAULT_SETTLE_DELAY,
            mon_ver: None,
            cfg_prt: None,
            cfg_nmea: None,
            cfg_nav5: None,
            cfg_esfalg: None,
            cfg_esfla: None,
        }
    }

    /// Pause between stopping the receiver and saving its state.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Drop cached configuration so the next read goes to the receiver.
    pub fn invalidate(&mut self) {
        self.cfg_nav5 = None;
        self.cfg_esfalg = None;
        self.cfg_esfla = None;
    }

    /// Drop every cached value, including static properties.
    pub fn reset_cache(&mut self) {
        self.invalidate();
        self.mon_ver = None;
        self.cfg_prt = None;
        self.cfg_nmea = None;
    }

    fn poll<P, R>(&self, request: P) -> Option<R>
    where
        P: UbxMessage,
        R: TryFrom<Message, Error = Message>,
    {
        let frame = match request.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!("cannot build {} request: {err}", P::SCHEMA.name);
                return None;
            }
        };
        match R::try_from(self.link.poll(&frame)?) {
            Ok(answer) => Some(answer),
            Err(other) => {
                debug!("unexpected {} answer to {}", other.name(), P::SCHEMA.name);
                None
            }
        }
    }

    fn set<M: UbxMessage>(&self, message: &M) -> Option<bool> {
        match message.to_frame() {
            Ok(frame) => self.link.set(&frame),
            Err(err) => {
                warn!("cannot build {}: {err}", M::SCHEMA.name);
                None
            }
        }
    }

    fn send<M: UbxMessage>(&self, message: &M) -> bool {
        match message.to_frame() {
            Ok(frame) => self.link.send(&frame),
            Err(err) => {
                warn!("cannot build {}: {err}", M::SCHEMA.name);
                false
            }
        }
    }

    fn mon_ver(&mut self) -> Option<&MonVer> {
        if self.mon_ver.is_none() {
            debug!("reading MON-VER");
            self.mon_ver = self.poll(MonVerPoll);
        }
        self.mon_ver.as_ref()
    }

    fn cfg_prt(&mut self) -> Option<&CfgPrtUart> {
        if self.cfg_prt.is_none() {
            debug!("reading CFG-PRT");
            self.cfg_prt = self.poll(CfgPrtPortPoll::UART1);
        }
        self.cfg_prt.as_ref()
    }

    fn cfg_nmea(&mut self) -> Option<&CfgNmea> {
        if self.cfg_nmea.is_none() {
            debug!("reading CFG-NMEA");
            self.cfg_nmea = self.poll(CfgNmeaPoll);
        }
        self.cfg_nmea.as_ref()
    }

    fn cfg_nav5(&mut self, force: bool) -> Option<CfgNav5> {
        if force || self.cfg_nav5.is_none() {
            debug!("reading CFG-NAV5");
            self.cfg_nav5 = self.poll(CfgNav5Poll);
        }
        self.cfg_nav5
    }

    fn cfg_esfalg(&mut self, force: bool) -> Option<CfgEsfAlg> {
        if force || self.cfg_esfalg.is_none() {
            debug!("reading CFG-ESFALG");
            self.cfg_esfalg = self.poll(CfgEsfAlgPoll);
        }
        self.cfg_esfalg
    }

    fn cfg_esfla(&mut self, force: bool) -> Option<&CfgEsfla> {
        if force || self.cfg_esfla.is_none() {
            debug!("reading CFG-ESFLA");
            self.cfg_esfla = self.poll(CfgEsflaPoll);
        }
        self.cfg_esfla.as_ref()
    }

    pub fn version(&mut self) -> Version {
        let Some(ver) = self.mon_ver() else {
            return Version::default();
        };
        Version {
            sw_version: ver.software_version(),
            hw_version: ver.hardware_version(),
            fw_version: ver
                .extension_value("FWVER")
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            protocol: ver
                .extension_value("PROTVER")
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        }
    }

    pub fn uart_settings(&mut self) -> UartSettings {
        self.cfg_prt()
            .map(|port| UartSettings {
                bitrate: port.baud_rate,
                mode: port.mode_string(),
            })
            .unwrap_or_default()
    }

    /// NMEA protocol version as `major.minor`, `0.0` when unknown.
    pub fn nmea_protocol(&mut self) -> String {
        self.cfg_nmea()
            .map(CfgNmea::version_string)
            .unwrap_or_else(|| "0.0".to_string())
    }

    pub fn dynamic_model(&mut self) -> Option<DynamicModel> {
        self.cfg_nav5(false)?.dynamic_model()
    }

    pub fn set_dynamic_model(&mut self, model: DynamicModel) -> String {
        info!("requesting dynamic model {model}");
        let Some(current) = self.cfg_nav5(true) else {
            return NOT_ACCESSIBLE.to_string();
        };
        if current.dyn_model == model as u8 {
            return "Dynamic model left as is".to_string();
        }
        let update = current.with_dynamic_model(model);
        match self.set(&update) {
            Some(true) => {
                self.cfg_nav5 = Some(CfgNav5 {
                    mask: current.mask,
                    ..update
                });
                format!("Dynamic model set to {model}")
            }
            Some(false) => REJECTED.to_string(),
            None => NOT_ACCESSIBLE.to_string(),
        }
    }

    pub fn auto_align(&mut self) -> Option<bool> {
        self.cfg_esfalg(false).map(|cfg| cfg.auto_alignment())
    }

    pub fn set_auto_align(&mut self, enable: bool) -> String {
        info!("requesting IMU automatic alignment {enable}");
        let Some(current) = self.cfg_esfalg(true) else {
            return NOT_ACCESSIBLE.to_string();
        };
        if current.auto_alignment() == enable {
            return "IMU automatic alignment left as is".to_string();
        }
        let mut update = current;
        update.set_auto_alignment(enable);
        self.write_esfalg(update, format!("IMU automatic alignment set to {enable}"))
    }

    pub fn imu_cfg_angles(&mut self) -> Angles {
        self.cfg_esfalg(false)
            .map(|cfg| cfg.angles())
            .unwrap_or_default()
    }

    /// Set the IMU mount angles in degrees: roll and pitch within ±180/±90, yaw 0..360.
    pub fn set_imu_cfg_angles(&mut self, angles: Angles) -> String {
        info!("requesting IMU angles {angles:?}");
        let roll = i16::try_from(to_centi(angles.roll)).ok().filter(|v| v.abs() <= 18_000);
        let pitch = i16::try_from(to_centi(angles.pitch)).ok().filter(|v| v.abs() <= 9_000);
        let yaw = u32::try_from(to_centi(angles.yaw)).ok().filter(|v| *v <= 36_000);
        let (Some(roll), Some(pitch), Some(yaw)) = (roll, pitch, yaw) else {
            return "Failed: IMU angles out of range.".to_string();
        };

        let Some(current) = self.cfg_esfalg(true) else {
            return NOT_ACCESSIBLE.to_string();
        };
        if (current.roll, current.pitch, current.yaw) == (roll, pitch, yaw) {
            return "IMU angles left as is".to_string();
        }
        let update = CfgEsfAlg {
            roll,
            pitch,
            yaw,
            ..current
        };
        self.write_esfalg(update, format!("IMU angles set to {:?}", update.angles()))
    }

    fn write_esfalg(&mut self, update: CfgEsfAlg, success: String) -> String {
        match self.set(&update) {
            Some(true) => {
                self.cfg_esfalg = Some(update);
                success
            }
            Some(false) => REJECTED.to_string(),
            None => NOT_ACCESSIBLE.to_string(),
        }
    }

    /// Current alignment state, always read fresh.
    pub fn auto_align_state(&mut self) -> String {
        self.poll::<_, EsfAlg>(EsfAlgPoll)
            .map(|alg| alg.status().to_string())
            .unwrap_or_else(|| NO_STATE.to_string())
    }

    pub fn auto_align_angles(&mut self) -> Angles {
        self.poll::<_, EsfAlg>(EsfAlgPoll)
            .map(|alg| alg.angles())
            .unwrap_or_default()
    }

    fn lever_arm(&mut self, kind: LeverArmKind) -> LeverArm {
        self.cfg_esfla(false)
            .and_then(|la| la.lever_arm(kind))
            .map(|c| c.meters())
            .unwrap_or_default()
    }

    pub fn vrp_ant(&mut self) -> LeverArm {
        self.lever_arm(LeverArmKind::VrpToAntenna)
    }

    pub fn vrp_imu(&mut self) -> LeverArm {
        self.lever_arm(LeverArmKind::VrpToImu)
    }

    pub fn set_vrp_ant(&mut self, distance: LeverArm) -> String {
        self.set_lever_arm(LeverArmKind::VrpToAntenna, "VRP antenna", distance)
    }

    pub fn set_vrp_imu(&mut self, distance: LeverArm) -> String {
        self.set_lever_arm(LeverArmKind::VrpToImu, "VRP IMU", distance)
    }

    fn set_lever_arm(&mut self, kind: LeverArmKind, label: &str, distance: LeverArm) -> String {
        info!("requesting {label} distance {distance:?}");
        let cm = |m: f64| i16::try_from((m * 100.0).round() as i64).ok();
        let (Some(x), Some(y), Some(z)) = (cm(distance.x), cm(distance.y), cm(distance.z)) else {
            return format!("Failed: {label} distance out of range.");
        };

        let Some(current) = self.cfg_esfla(true) else {
            return NOT_ACCESSIBLE.to_string();
        };
        if current
            .lever_arm(kind)
            .is_some_and(|c| (c.x, c.y, c.z) == (x, y, z))
        {
            return format!("{label} distance left as is");
        }

        let outcome = match self.set(&CfgEsfla::single(kind, x, y, z)) {
            Some(true) => format!("{label} distance set to {distance:?}"),
            Some(false) => REJECTED.to_string(),
            None => NOT_ACCESSIBLE.to_string(),
        };
        // Re-read the whole table next time; the update only carries one entry.
        self.cfg_esfla = None;
        outcome
    }

    /// Fusion summary, or `None` when the receiver does not answer.
    pub fn read_esf_status(&mut self) -> Option<EsfState> {
        self.poll::<_, EsfStatus>(EsfStatusPoll)
            .map(|status| EsfState::from(&status))
    }

    pub fn esf_status(&mut self) -> EsfState {
        self.read_esf_status().unwrap_or_default()
    }

    /// Whether the last start restored a saved state.
    pub fn sos_state(&mut self) -> Option<RestoreState> {
        self.poll::<_, UpdSosStatus>(UpdSosPoll)?.restore_state()
    }

    pub fn cold_start(&mut self) -> String {
        info!("executing GNSS cold start");
        // CFG-RST is never acknowledged.
        let sent = self.send(&CfgRst::cold_start());
        self.invalidate();
        if sent {
            "Success".to_string()
        } else {
            NOT_ACCESSIBLE.to_string()
        }
    }

    pub fn save_config(&mut self) -> String {
        info!("saving GNSS config");
        match self.set(&CfgCfg::save(CONFIG_MASK)) {
            Some(true) => "Success".to_string(),
            Some(false) => REJECTED.to_string(),
            None => NOT_ACCESSIBLE.to_string(),
        }
    }

    pub fn reset_config(&mut self) -> String {
        info!("resetting GNSS config");
        let outcome = match self.set(&CfgCfg::reset(CONFIG_MASK)) {
            Some(true) => "Success".to_string(),
            Some(false) => REJECTED.to_string(),
            None => NOT_ACCESSIBLE.to_string(),
        };
        self.invalidate();
        outcome
    }

    /// Save receiver state to flash for the next power up.
    ///
    /// The receiver is stopped for the duration of the save and restarted
    /// afterwards, whether or not the save was acknowledged.
    pub fn save_state(&mut self) -> String {
        info!("saving GNSS state");
        if !self.send(&CfgRst::stop()) {
            return NOT_ACCESSIBLE.to_string();
        }
        thread::sleep(self.settle_delay);

        let saved = self
            .poll::<_, UpdSosStatus>(UpdSos::save())
            .is_some_and(|status| status.backup_created());

        if !self.send(&CfgRst::start()) {
            warn!("restarting receiver after state save failed");
        }
        if saved {
            "Success".to_string()
        } else {
            "Failed: state not saved.".to_string()
        }
    }

    /// Clear saved receiver state. Not acknowledged by the receiver.
    pub fn clear_state(&mut self) -> String {
        info!("clearing GNSS state");
        if self.send(&UpdSos::clear()) {
            "Success".to_string()
        } else {
            NOT_ACCESSIBLE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ubx::Frame;
    use crate::ubx::messages::{AckAck, LeverArmConfig, MonVerExtension};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Poll(Frame),
        Set(Frame),
        Send(Frame),
    }

    #[derive(Default)]
    struct MockLink {
        answers: Mutex<HashMap<(u8, u8), Message>>,
        calls: Mutex<Vec<Call>>,
        offline: bool,
    }

    impl MockLink {
        fn answer(&self, message: impl Into<Message>, key: (u8, u8)) {
            self.answers.lock().unwrap().insert(key, message.into());
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn writes(&self) -> Vec<Frame> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Set(f) | Call::Send(f) => Some(f),
                    Call::Poll(_) => None,
                })
                .collect()
        }
    }

    impl UbxLink for MockLink {
        fn poll(&self, frame: &Frame) -> Option<Message> {
            self.calls.lock().unwrap().push(Call::Poll(frame.clone()));
            if self.offline {
                return None;
            }
            self.answers.lock().unwrap().get(&frame.key()).cloned()
        }

        fn set(&self, frame: &Frame) -> Option<bool> {
            self.calls.lock().unwrap().push(Call::Set(frame.clone()));
            (!self.offline).then_some(true)
        }

        fn send(&self, frame: &Frame) -> bool {
            self.calls.lock().unwrap().push(Call::Send(frame.clone()));
            !self.offline
        }
    }

    fn nav5(dyn_model: u8) -> CfgNav5 {
        CfgNav5 {
            mask: 0xFFFF,
            dyn_model,
            fix_mode: 3,
            fixed_alt: 0,
            fixed_alt_var: 10_000,
            min_elev: 5,
            dr_limit: 0,
            p_dop: 250,
            t_dop: 250,
            p_acc: 100,
            t_acc: 300,
            static_hold_thresh: 0,
            dgnss_timeout: 60,
            cno_thresh_num_svs: 0,
            cno_thresh: 0,
            reserved1: [0; 2],
            static_hold_max_dist: 0,
            utc_standard: 0,
            reserved2: [0; 5],
        }
    }

    fn esfalg(bitfield: u32) -> CfgEsfAlg {
        CfgEsfAlg {
            bitfield,
            yaw: 9_000,
            pitch: -250,
            roll: 100,
        }
    }

    fn driver(link: &Arc<MockLink>) -> Gnss<MockLink> {
        Gnss::new(Arc::clone(link)).with_settle_delay(Duration::ZERO)
    }

    #[test]
    fn unchanged_dynamic_model_is_not_written() {
        let link = Arc::new(MockLink::default());
        link.answer(nav5(4), (0x06, 0x24));
        let mut gnss = driver(&link);

        assert_eq!(gnss.set_dynamic_model(DynamicModel::Automotive), "Dynamic model left as is");
        assert!(link.writes().is_empty());
    }

    #[test]
    fn changed_dynamic_model_writes_masked_update() {
        let link = Arc::new(MockLink::default());
        link.answer(nav5(0), (0x06, 0x24));
        let mut gnss = driver(&link);

        let outcome = gnss.set_dynamic_model(DynamicModel::Automotive);
        assert_eq!(outcome, "Dynamic model set to 4 (automotive)");
        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].key(), (0x06, 0x24));
        assert_eq!(&writes[0].payload[..3], &[0x01, 0x00, 0x04]);
        assert!(matches!(link.calls()[1], Call::Set(_)));

        // Served from cache without another poll.
        let polls_before = link.calls().len();
        assert_eq!(gnss.dynamic_model(), Some(DynamicModel::Automotive));
        assert_eq!(link.calls().len(), polls_before);
    }

    #[test]
    fn unchanged_auto_align_and_angles_are_not_written() {
        let link = Arc::new(MockLink::default());
        link.answer(esfalg(CfgEsfAlg::DO_AUTO_MNT_ALG), (0x06, 0x56));
        let mut gnss = driver(&link);

        assert_eq!(gnss.set_auto_align(true), "IMU automatic alignment left as is");
        let angles = Angles {
            roll: 1.0,
            pitch: -2.5,
            yaw: 90.0,
        };
        assert_eq!(gnss.set_imu_cfg_angles(angles), "IMU angles left as is");
        assert!(link.writes().is_empty());

        assert_eq!(
            gnss.set_auto_align(false),
            "IMU automatic alignment set to false"
        );
        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].payload[..4], &[0, 0, 0, 0]);
        assert_eq!(gnss.auto_align(), Some(false));
    }

    #[test]
    fn imu_angles_out_of_range_are_refused() {
        let link = Arc::new(MockLink::default());
        link.answer(esfalg(0), (0x06, 0x56));
        let mut gnss = driver(&link);
        let outcome = gnss.set_imu_cfg_angles(Angles {
            roll: 0.0,
            pitch: 95.0,
            yaw: 0.0,
        });
        assert_eq!(outcome, "Failed: IMU angles out of range.");
        assert!(link.calls().is_empty());
    }

    #[test]
    fn lever_arm_update_skips_identical_values() {
        let link = Arc::new(MockLink::default());
        let table = CfgEsfla {
            version: 0,
            num_configs: 1,
            reserved1: [0; 2],
            configs: vec![LeverArmConfig {
                kind: LeverArmKind::VrpToAntenna as u8,
                reserved2: 0,
                x: 150,
                y: 0,
                z: -20,
            }],
        };
        link.answer(table, (0x06, 0x2F));
        let mut gnss = driver(&link);

        let same = LeverArm {
            x: 1.5,
            y: 0.0,
            z: -0.2,
        };
        assert_eq!(gnss.vrp_ant(), same);
        assert_eq!(gnss.set_vrp_ant(same), "VRP antenna distance left as is");
        assert!(link.writes().is_empty());

        let outcome = gnss.set_vrp_imu(LeverArm {
            x: 0.1,
            y: 0.0,
            z: 0.0,
        });
        assert!(outcome.starts_with("VRP IMU distance set to"));
        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload, vec![0, 1, 0, 0, 1, 0, 10, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn save_state_stops_saves_and_restarts() {
        let link = Arc::new(MockLink::default());
        link.answer(
            UpdSosStatus {
                cmd: UpdSosStatus::CMD_BACKUP_ACK,
                reserved1: [0; 3],
                response: 1,
                reserved2: [0; 3],
            },
            (0x09, 0x14),
        );
        let mut gnss = driver(&link);

        assert_eq!(gnss.save_state(), "Success");
        let calls = link.calls();
        assert_eq!(
            calls,
            vec![
                Call::Send(CfgRst::stop().to_frame().unwrap()),
                Call::Poll(UpdSos::save().to_frame().unwrap()),
                Call::Send(CfgRst::start().to_frame().unwrap()),
            ]
        );
    }

    #[test]
    fn save_state_reports_missing_acknowledgement_but_restarts() {
        let link = Arc::new(MockLink::default());
        let mut gnss = driver(&link);
        assert_eq!(gnss.save_state(), "Failed: state not saved.");
        assert_eq!(
            link.calls().last(),
            Some(&Call::Send(CfgRst::start().to_frame().unwrap()))
        );
    }

    #[test]
    fn offline_receiver_yields_placeholders() {
        let link = Arc::new(MockLink {
            offline: true,
            ..MockLink::default()
        });
        let mut gnss = driver(&link);

        assert_eq!(gnss.version(), Version::default());
        assert_eq!(gnss.uart_settings(), UartSettings::default());
        assert_eq!(gnss.nmea_protocol(), "0.0");
        assert_eq!(gnss.dynamic_model(), None);
        assert_eq!(gnss.auto_align(), None);
        assert_eq!(gnss.imu_cfg_angles(), Angles::default());
        assert_eq!(gnss.auto_align_state(), "-");
        assert_eq!(gnss.vrp_imu(), LeverArm::default());
        assert_eq!(gnss.esf_status(), EsfState::default());
        assert_eq!(gnss.set_dynamic_model(DynamicModel::Sea), NOT_ACCESSIBLE);
        assert_eq!(gnss.cold_start(), NOT_ACCESSIBLE);
        assert_eq!(gnss.save_state(), NOT_ACCESSIBLE);
    }

    #[test]
    fn static_values_are_cached_until_reset() {
        let link = Arc::new(MockLink::default());
        let mut sw = [0_u8; 30];
        sw[..4].copy_from_slice(b"3.01");
        let mut fw = [0_u8; 30];
        fw[..14].copy_from_slice(b"FWVER=ADR 4.21");
        link.answer(
            MonVer {
                sw_version: sw,
                hw_version: [0; 10],
                extensions: vec![MonVerExtension { text: fw }],
            },
            (0x0A, 0x04),
        );
        let mut gnss = driver(&link);

        let version = gnss.version();
        assert_eq!(version.sw_version, "3.01");
        assert_eq!(version.fw_version, "ADR 4.21");
        assert_eq!(version.protocol, "n/a");
        gnss.version();
        gnss.invalidate();
        gnss.version();
        assert_eq!(link.calls().len(), 1);

        gnss.reset_cache();
        gnss.version();
        assert_eq!(link.calls().len(), 2);
    }

    #[test]
    fn unexpected_answer_is_treated_as_missing() {
        let link = Arc::new(MockLink::default());
        link.answer(
            AckAck {
                class: 0x06,
                id: 0x24,
            },
            (0x06, 0x24),
        );
        let mut gnss = driver(&link);
        assert_eq!(gnss.dynamic_model(), None);
    }
}
