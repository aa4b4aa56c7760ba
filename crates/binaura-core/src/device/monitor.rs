//! Identity & reconnection state machine
//!
//! Owns the intended selection (aggregate, output and input sub-device, all
//! by UID) and the routes currently bound. [`IdentityMonitor::reconcile`]
//! compares intent with a fresh topology snapshot and reports, per
//! direction, what happened. Whether that needs a stream restart or only a
//! channel remap is derived from those actions in one place,
//! [`Reconciliation::decision`].
//!
//! Per direction, in priority order:
//!
//! 1. Intended UID present: bind it. A different numeric id than the bound
//!    one is a reconnection; same id with shifted channels is a remap.
//! 2. Bound route still resolves by numeric id: nothing to do.
//! 3. Otherwise fall back to the first candidate and adopt its UID, or
//!    report the direction disconnected when there is none.
//!
//! A present UID match always wins over "first available".

use super::{
    ChannelSelection, DeviceInspector, SubDeviceRoute, SubDevices, Topology, TopologyError,
    TopologyResult,
};
use crate::hal::{DeviceId, HalDevice};
use crate::types::{ChannelRange, Direction};

/// Channels used per direction until the user widens the range
pub const DEFAULT_ROUTE_WIDTH: u16 = 2;

/// Outcome of reconciling one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAction {
    /// Bound route is still valid as-is
    Unchanged,
    /// First binding (nothing was bound before)
    Bound,
    /// Same numeric id, channel range moved inside the aggregate
    Remapped,
    /// Intended UID is back under a different numeric id
    Reconnected,
    /// Intended device gone; the first candidate was adopted
    FellBack,
    /// Nothing can be bound in this direction
    Disconnected,
}

impl RouteAction {
    fn needs_restart(self) -> bool {
        matches!(
            self,
            RouteAction::Bound | RouteAction::Reconnected | RouteAction::FellBack
        )
    }
}

/// What the pipeline has to do after a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Keep streaming untouched
    Unchanged,
    /// Publish the new channel selection, no stream restart
    Remap,
    /// Stop, reconfigure against the new ids, restart
    Restart,
    /// Stop and raise a disconnection fault
    Disconnect,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub output: RouteAction,
    pub input: RouteAction,
    /// The aggregate itself came back under a new numeric id
    pub aggregate_changed: bool,
    /// Resolved selection, `None` when disconnected
    pub selection: Option<ChannelSelection>,
    /// Why nothing could be bound, when that is the case
    pub fault: Option<TopologyError>,
}

impl Reconciliation {
    pub fn decision(&self) -> RouteDecision {
        if self.fault.is_some() || self.selection.is_none() {
            RouteDecision::Disconnect
        } else if self.aggregate_changed
            || self.output.needs_restart()
            || self.input.needs_restart()
        {
            RouteDecision::Restart
        } else if self.output == RouteAction::Remapped || self.input == RouteAction::Remapped {
            RouteDecision::Remap
        } else {
            RouteDecision::Unchanged
        }
    }

    /// Action for one direction
    pub fn action(&self, direction: Direction) -> RouteAction {
        match direction {
            Direction::Input => self.input,
            Direction::Output => self.output,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct RouteState {
    intended_uid: Option<String>,
    current: Option<SubDeviceRoute>,
    /// Numeric id of the last binding, kept across disconnects
    last_id: Option<DeviceId>,
    /// User channel choice, relative to the route's first channel
    user_range: Option<ChannelRange>,
}

impl RouteState {
    fn with_intent(uid: Option<String>) -> Self {
        Self {
            intended_uid: uid,
            ..Self::default()
        }
    }

    fn bind(&mut self, route: SubDeviceRoute) {
        self.last_id = Some(route.device.id);
        self.current = Some(route);
    }

    fn reconcile(&mut self, direction: Direction, subs: &SubDevices) -> RouteAction {
        let candidates = subs.candidates(direction);

        if let Some(uid) = self.intended_uid.as_deref() {
            if let Some(found) = candidates.iter().find(|r| r.device.uid == uid) {
                let action = match &self.current {
                    None if self.last_id.is_some_and(|id| id != found.device.id) => {
                        RouteAction::Reconnected
                    }
                    None => RouteAction::Bound,
                    Some(current) if current.device.id != found.device.id => {
                        RouteAction::Reconnected
                    }
                    Some(current) if current.range != found.range => RouteAction::Remapped,
                    Some(_) => RouteAction::Unchanged,
                };
                self.bind(found.clone());
                return action;
            }
        }

        if let Some(current) = &self.current {
            if candidates.iter().any(|r| r.device.id == current.device.id) {
                return RouteAction::Unchanged;
            }
        }

        match candidates.first() {
            Some(first) => {
                let action = if self.intended_uid.is_none() && self.current.is_none() {
                    RouteAction::Bound
                } else {
                    log::warn!(
                        "{} device {} unavailable, falling back to {}",
                        direction,
                        self.intended_uid.as_deref().unwrap_or("<none>"),
                        first.device.uid
                    );
                    RouteAction::FellBack
                };
                self.intended_uid = Some(first.device.uid.clone());
                self.user_range = None;
                self.bind(first.clone());
                action
            }
            None => {
                self.current = None;
                RouteAction::Disconnected
            }
        }
    }

    fn fault(&self, direction: Direction) -> TopologyError {
        match &self.intended_uid {
            Some(uid) => TopologyError::Disconnected {
                direction,
                uid: uid.clone(),
            },
            None => TopologyError::NoUsableChannels(direction),
        }
    }

    /// Channels the pipeline uses inside the bound route
    ///
    /// Without a user choice both directions take the route's first stereo
    /// pair; a multichannel layout only renders once asked for.
    fn resolved_range(&self) -> Option<ChannelRange> {
        let route = self.current.as_ref()?.range;

        if let Some(relative) = self.user_range {
            let absolute = relative.moved_to(route.start() + relative.start())?;
            if route.contains_range(&absolute) {
                return Some(absolute);
            }
        }

        ChannelRange::with_width(route.start(), route.width().min(DEFAULT_ROUTE_WIDTH))
    }
}

/// Intended-vs-actual device selection tracker
#[derive(Debug, Clone)]
pub struct IdentityMonitor {
    inspector: DeviceInspector,
    max_channels: u16,
    aggregate_uid: Option<String>,
    aggregate_id: Option<DeviceId>,
    output: RouteState,
    input: RouteState,
}

impl IdentityMonitor {
    pub fn new(inspector: DeviceInspector, max_channels: u16) -> Self {
        Self {
            inspector,
            max_channels,
            aggregate_uid: None,
            aggregate_id: None,
            output: RouteState::default(),
            input: RouteState::default(),
        }
    }

    pub fn inspector(&self) -> &DeviceInspector {
        &self.inspector
    }

    pub fn aggregate_uid(&self) -> Option<&str> {
        self.aggregate_uid.as_deref()
    }

    /// Intended sub-device UID for a direction
    pub fn intended_uid(&self, direction: Direction) -> Option<&str> {
        self.route_state(direction).intended_uid.as_deref()
    }

    /// Currently bound route for a direction
    pub fn route(&self, direction: Direction) -> Option<&SubDeviceRoute> {
        self.route_state(direction).current.as_ref()
    }

    /// Current selection, when both directions are bound
    pub fn selection(&self) -> Option<ChannelSelection> {
        Some(ChannelSelection {
            aggregate: self.aggregate_id?,
            input: self.input.resolved_range()?,
            output: self.output.resolved_range()?,
        })
    }

    fn route_state(&self, direction: Direction) -> &RouteState {
        match direction {
            Direction::Input => &self.input,
            Direction::Output => &self.output,
        }
    }

    fn route_state_mut(&mut self, direction: Direction) -> &mut RouteState {
        match direction {
            Direction::Input => &mut self.input,
            Direction::Output => &mut self.output,
        }
    }

    /// Replace the whole intent (e.g. from persisted settings)
    ///
    /// Nothing is bound until the next [`reconcile`](Self::reconcile).
    pub fn restore(
        &mut self,
        aggregate_uid: Option<String>,
        output_uid: Option<String>,
        input_uid: Option<String>,
    ) {
        self.aggregate_uid = aggregate_uid;
        self.aggregate_id = None;
        self.output = RouteState::with_intent(output_uid);
        self.input = RouteState::with_intent(input_uid);
    }

    /// Switch to another aggregate and rebind both directions
    pub fn select_aggregate(
        &mut self,
        uid: &str,
        topology: &Topology,
    ) -> TopologyResult<Reconciliation> {
        if topology.by_uid(uid).is_none() {
            return Err(TopologyError::DeviceNotFound(uid.to_string()));
        }

        self.aggregate_uid = Some(uid.to_string());
        self.aggregate_id = None;
        for state in [&mut self.output, &mut self.input] {
            state.current = None;
            state.last_id = None;
            state.user_range = None;
        }
        Ok(self.reconcile(topology))
    }

    /// Select the sub-device for one direction by UID
    pub fn select(
        &mut self,
        direction: Direction,
        uid: &str,
        topology: &Topology,
    ) -> TopologyResult<Reconciliation> {
        let aggregate = self.resolve_aggregate(topology)?;
        let subs = self.inspector.list_sub_devices(topology, aggregate);
        if subs.find_uid(direction, uid).is_none() {
            return Err(TopologyError::DeviceNotFound(uid.to_string()));
        }

        let state = self.route_state_mut(direction);
        state.intended_uid = Some(uid.to_string());
        state.user_range = None;
        Ok(self.reconcile(topology))
    }

    /// Narrow one direction to a channel range (aggregate space)
    ///
    /// Only valid inside the bound route; never needs a stream restart.
    pub fn set_channels(
        &mut self,
        direction: Direction,
        range: ChannelRange,
    ) -> TopologyResult<ChannelSelection> {
        let max_channels = self.max_channels;
        let state = self.route_state_mut(direction);
        let route = state
            .current
            .as_ref()
            .map(|r| r.range)
            .ok_or_else(|| state.fault(direction))?;

        if !route.contains_range(&range) || range.width() > max_channels {
            return Err(TopologyError::RangeOutOfBounds {
                direction,
                range,
                route,
            });
        }

        state.user_range = range.moved_to(range.start() - route.start());
        self.selection().ok_or(TopologyError::NoAggregate)
    }

    /// Reconcile intent against a fresh snapshot
    pub fn reconcile(&mut self, topology: &Topology) -> Reconciliation {
        let aggregate = match self.resolve_aggregate(topology) {
            Ok(device) => device.clone(),
            Err(err) => return self.disconnect(err),
        };

        let aggregate_changed = self.aggregate_id.is_some_and(|id| id != aggregate.id);
        self.aggregate_id = Some(aggregate.id);

        let subs = self.inspector.list_sub_devices(topology, &aggregate);
        if !subs.missing.is_empty() {
            log::warn!(
                "Aggregate {} is missing members: {}",
                aggregate.uid,
                subs.missing.join(", ")
            );
        }

        let output = self.output.reconcile(Direction::Output, &subs);
        let input = self.input.reconcile(Direction::Input, &subs);

        let fault = if output == RouteAction::Disconnected {
            Some(self.output.fault(Direction::Output))
        } else if input == RouteAction::Disconnected {
            Some(self.input.fault(Direction::Input))
        } else {
            None
        };

        let selection = if fault.is_none() { self.selection() } else { None };

        log::debug!(
            "Reconciled {}: output {:?}, input {:?}, aggregate changed: {}",
            aggregate.uid,
            output,
            input,
            aggregate_changed
        );

        Reconciliation {
            output,
            input,
            aggregate_changed,
            selection,
            fault,
        }
    }

    fn resolve_aggregate<'a>(&self, topology: &'a Topology) -> TopologyResult<&'a HalDevice> {
        let uid = self.aggregate_uid.as_deref().ok_or(TopologyError::NoAggregate)?;
        topology
            .by_uid(uid)
            .ok_or_else(|| TopologyError::DeviceNotFound(uid.to_string()))
    }

    fn disconnect(&mut self, fault: TopologyError) -> Reconciliation {
        self.aggregate_id = None;
        self.output.current = None;
        self.input.current = None;

        Reconciliation {
            output: RouteAction::Disconnected,
            input: RouteAction::Disconnected,
            aggregate_changed: false,
            selection: None,
            fault: Some(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(phones_id: DeviceId, phones_outputs: u16) -> Topology {
        Topology::new(vec![
            HalDevice::new(1, "mic", "Mic").with_inputs(2),
            HalDevice::new(2, "speakers", "Speakers").with_outputs(2),
            HalDevice::new(phones_id, "phones", "Phones").with_outputs(phones_outputs),
            HalDevice::new(100, "agg", "Aggregate").with_members(["mic", "speakers", "phones"]),
        ])
    }

    fn monitor() -> IdentityMonitor {
        let mut monitor = IdentityMonitor::new(DeviceInspector::new(&["loopback"]), 16);
        monitor.restore(Some("agg".into()), Some("phones".into()), Some("mic".into()));
        monitor
    }

    #[test]
    fn test_initial_bind_uses_intended_uids() {
        let mut monitor = monitor();
        let result = monitor.reconcile(&topology(5, 2));

        assert_eq!(result.output, RouteAction::Bound);
        assert_eq!(result.decision(), RouteDecision::Restart);
        let selection = result.selection.unwrap();
        assert_eq!(selection.aggregate, 100);
        assert_eq!(selection.output, ChannelRange::new(2, 4).unwrap());
        assert_eq!(selection.input, ChannelRange::new(0, 2).unwrap());
    }

    #[test]
    fn test_uid_match_beats_first_available() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        // Unplugged and replugged within one debounce window: new numeric id
        let result = monitor.reconcile(&topology(9, 2));
        assert_eq!(result.output, RouteAction::Reconnected);
        assert_eq!(result.decision(), RouteDecision::Restart);
        assert_eq!(monitor.intended_uid(Direction::Output), Some("phones"));
        assert_eq!(monitor.route(Direction::Output).unwrap().device.id, 9);
    }

    #[test]
    fn test_remap_keeps_numeric_binding() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        // Speakers grow to 4 channels, pushing phones to 4..6
        let mut devices = topology(5, 2).devices().to_vec();
        devices[1].output_channels = 4;
        let result = monitor.reconcile(&Topology::new(devices));

        assert_eq!(result.output, RouteAction::Remapped);
        assert_eq!(result.decision(), RouteDecision::Remap);
        assert_eq!(result.selection.unwrap().output, ChannelRange::new(4, 6).unwrap());
    }

    #[test]
    fn test_fallback_adopts_first_candidate() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        let devices: Vec<HalDevice> = topology(5, 2)
            .devices()
            .iter()
            .filter(|d| d.uid != "phones")
            .cloned()
            .collect();
        let result = monitor.reconcile(&Topology::new(devices));

        assert_eq!(result.output, RouteAction::FellBack);
        assert_eq!(result.decision(), RouteDecision::Restart);
        assert_eq!(monitor.intended_uid(Direction::Output), Some("speakers"));
    }

    #[test]
    fn test_no_candidates_is_a_disconnect() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        let devices: Vec<HalDevice> = topology(5, 2)
            .devices()
            .iter()
            .filter(|d| d.uid != "phones" && d.uid != "speakers")
            .cloned()
            .collect();
        let result = monitor.reconcile(&Topology::new(devices));

        assert_eq!(result.decision(), RouteDecision::Disconnect);
        assert_eq!(
            result.fault,
            Some(TopologyError::Disconnected {
                direction: Direction::Output,
                uid: "phones".into()
            })
        );
        // Intent survives so the device is rematched when it returns
        assert_eq!(monitor.intended_uid(Direction::Output), Some("phones"));

        let back = monitor.reconcile(&topology(9, 2));
        assert_eq!(back.output, RouteAction::Reconnected);
        assert_eq!(back.decision(), RouteDecision::Restart);
    }

    #[test]
    fn test_missing_aggregate_disconnects() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        let result = monitor.reconcile(&Topology::default());
        assert_eq!(result.decision(), RouteDecision::Disconnect);
        assert_eq!(result.fault, Some(TopologyError::DeviceNotFound("agg".into())));
        assert_eq!(monitor.aggregate_uid(), Some("agg"));
    }

    #[test]
    fn test_aggregate_renumbering_restarts() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        let mut devices = topology(5, 2).devices().to_vec();
        devices[3].id = 101;
        let result = monitor.reconcile(&Topology::new(devices));
        assert!(result.aggregate_changed);
        assert_eq!(result.decision(), RouteDecision::Restart);
    }

    #[test]
    fn test_user_range_follows_remap() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 4));

        let selection = monitor
            .set_channels(Direction::Output, ChannelRange::new(4, 6).unwrap())
            .unwrap();
        assert_eq!(selection.output, ChannelRange::new(4, 6).unwrap());

        let mut devices = topology(5, 4).devices().to_vec();
        devices[1].output_channels = 4;
        let result = monitor.reconcile(&Topology::new(devices));
        assert_eq!(result.selection.unwrap().output, ChannelRange::new(6, 8).unwrap());
    }

    #[test]
    fn test_set_channels_rejects_foreign_range() {
        let mut monitor = monitor();
        monitor.reconcile(&topology(5, 2));

        let err = monitor
            .set_channels(Direction::Output, ChannelRange::new(0, 2).unwrap())
            .unwrap_err();
        assert!(matches!(err, TopologyError::RangeOutOfBounds { .. }));
    }

    #[test]
    fn test_select_unknown_uid_fails() {
        let mut monitor = monitor();
        let topology = topology(5, 2);
        monitor.reconcile(&topology);

        assert_eq!(
            monitor.select(Direction::Output, "mic", &topology).unwrap_err(),
            TopologyError::DeviceNotFound("mic".into())
        );
        let result = monitor.select(Direction::Output, "speakers", &topology).unwrap();
        assert_eq!(result.output, RouteAction::Reconnected);
        assert_eq!(result.selection.unwrap().output, ChannelRange::new(0, 2).unwrap());
    }

    #[test]
    fn test_wide_input_defaults_to_stereo_pair() {
        let mut monitor = monitor();
        let mut devices = topology(5, 2).devices().to_vec();
        devices[0].input_channels = 8;
        let selection = monitor.reconcile(&Topology::new(devices)).selection.unwrap();
        assert_eq!(selection.input, ChannelRange::new(0, 2).unwrap());

        // Widening is an explicit choice
        let selection = monitor
            .set_channels(Direction::Input, ChannelRange::new(0, 8).unwrap())
            .unwrap();
        assert_eq!(selection.input, ChannelRange::new(0, 8).unwrap());
    }
}
