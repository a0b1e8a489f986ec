//! Collaborators the device profile state machine drives.
//!
//! Every collaborator is injected into the state machine at construction. Their asynchronous
//! completions (connection state changes, prompt replies, service binding) come back as
//! [`crate::Message`]s on the device's own queue; none of these calls block.

use num_derive::{FromPrimitive, ToPrimitive};
use std::collections::HashSet;
use std::time::Duration;

use crate::device_profile_state::Command;
use crate::incoming_access::IncomingAccessRecord;
use crate::uuid::{Profile, Uuid};

/// Connection state reported by a profile service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ProfileConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

/// Stored connection policy of a profile for a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ProfilePriority {
    Off = 0,
    On = 100,
    AutoConnect = 1000,
}

/// Bond state of the remote device as reported by the bond controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BondState {
    NotBonded,
    Bonding,
    Bonded,
}

/// Handsfree, A2DP or HID profile service.
pub trait IProfileService {
    /// Starts an outgoing connection. Returns false if it could not be started.
    fn connect(&mut self, device: &str) -> bool;

    /// Starts an outgoing disconnection. Returns false if it could not be started.
    fn disconnect(&mut self, device: &str) -> bool;

    /// Aborts an outgoing connection that has not completed yet.
    fn cancel_connect(&mut self, device: &str);

    /// Lets a remote-initiated connection proceed.
    fn accept_incoming(&mut self, device: &str) -> bool;

    /// Refuses a remote-initiated connection.
    fn reject_incoming(&mut self, device: &str) -> bool;

    fn get_priority(&self, device: &str) -> ProfilePriority;

    fn set_priority(&mut self, device: &str, priority: ProfilePriority);

    /// Addresses of all devices this service is connected or connecting to.
    fn get_connected_or_connecting_devices(&self) -> HashSet<String>;
}

/// Phone book access service. Only ever disconnected from here.
pub trait IPbapService {
    fn disconnect(&mut self) -> bool;
}

/// Adapter-level bond and storage operations.
pub trait IBondController {
    /// Removes the bond with the device. Completion comes back as a bond state change.
    fn remove_bond(&mut self, device: &str) -> bool;

    /// Reads the persisted incoming-connection access record of the device.
    fn get_incoming_state(&self, device: &str) -> Option<IncomingAccessRecord>;

    /// Persists the incoming-connection access record of the device.
    fn write_incoming_state(&mut self, device: &str, record: &IncomingAccessRecord);

    /// Returns true while the adapter is shutting down.
    fn is_turning_off(&self) -> bool;

    /// Service UUIDs last discovered on the device.
    fn get_remote_uuids(&self, device: &str) -> Vec<Uuid>;

    /// Starts an SDP query to refresh the device's UUIDs.
    fn fetch_remote_uuids(&mut self, device: &str) -> bool;

    /// Returns true if the device is known to misbehave when we connect sibling profiles
    /// after it connected one of them.
    fn avoid_auto_connect(&self, device: &str) -> bool;

    /// Publishes a connection state change the profile service could not report itself.
    fn send_connection_state_change(
        &mut self,
        device: &str,
        profile: Profile,
        state: ProfileConnectionState,
        prev_state: ProfileConnectionState,
    );
}

/// Privileged UI asking the user whether a remote may connect.
pub trait IAccessPrompt {
    fn send_access_request(&mut self, device: &str);
    fn cancel_access_request(&mut self, device: &str);
}

pub trait IDockQuery {
    /// Returns true if the device is the dock the phone currently sits in.
    fn is_device_docked(&self, device: &str) -> bool;
}

/// Screen wake lock held while an access prompt is shown. It is not reference counted, so a
/// single release undoes any number of acquires.
pub trait IPowerManager {
    fn is_screen_on(&self) -> bool;
    fn acquire_wake_lock(&mut self);
    fn release_wake_lock(&mut self);
}

/// One-shot delayed delivery of a command back onto the same device's queue.
pub trait ICommandTimer {
    fn post_delayed(&mut self, command: Command, delay: Duration);
}

/// Everything a [`crate::device_profile_state::DeviceProfileState`] talks to.
pub struct ProfileCollaborators {
    pub headset: Box<dyn IProfileService + Send>,
    pub a2dp: Box<dyn IProfileService + Send>,
    pub hid: Box<dyn IProfileService + Send>,
    pub pbap: Box<dyn IPbapService + Send>,
    pub bond: Box<dyn IBondController + Send>,
    pub prompt: Box<dyn IAccessPrompt + Send>,
    pub dock: Box<dyn IDockQuery + Send>,
    pub power: Box<dyn IPowerManager + Send>,
    pub timer: Box<dyn ICommandTimer + Send>,
    pub clock: Box<dyn bt_common::time::Clock + Send>,
}

impl ProfileCollaborators {
    /// Returns the connection service for one of the connection-oriented profiles.
    pub(crate) fn service(
        &mut self,
        profile: Profile,
    ) -> Option<&mut Box<dyn IProfileService + Send>> {
        match profile {
            Profile::Hfp => Some(&mut self.headset),
            Profile::A2dp => Some(&mut self.a2dp),
            Profile::Hid => Some(&mut self.hid),
            Profile::Pbap => None,
        }
    }

    pub(crate) fn service_ref(&self, profile: Profile) -> Option<&(dyn IProfileService + Send)> {
        match profile {
            Profile::Hfp => Some(self.headset.as_ref()),
            Profile::A2dp => Some(self.a2dp.as_ref()),
            Profile::Hid => Some(self.hid.as_ref()),
            Profile::Pbap => None,
        }
    }
}
