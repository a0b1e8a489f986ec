//! Profiles coordinated per device and the service UUIDs a remote advertises for them.

use lazy_static::lazy_static;
use num_derive::{FromPrimitive, ToPrimitive};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

// List of profile uuids
pub const HSP: &str = "00001108-0000-1000-8000-00805F9B34FB";
pub const HFP: &str = "0000111E-0000-1000-8000-00805F9B34FB";
pub const A2DP_SINK: &str = "0000110B-0000-1000-8000-00805F9B34FB";
pub const HID: &str = "00001124-0000-1000-8000-00805f9b34fb";
pub const PBAP_PSE: &str = "0000112f-0000-1000-8000-00805F9B34FB";

/// A 128-bit service UUID.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Uuid {
    pub uu: [u8; 16],
}

impl Uuid {
    /// Parses the canonical `8-4-4-4-12` hex form. Case does not matter.
    pub fn from_string<S: AsRef<str>>(raw: S) -> Option<Uuid> {
        let raw = raw.as_ref();
        let groups: Vec<&str> = raw.split('-').collect();
        if groups.len() != 5
            || groups.iter().map(|g| g.len()).collect::<Vec<_>>() != vec![8, 4, 4, 4, 12]
        {
            return None;
        }

        let hex: String = groups.concat();
        let mut uu = [0u8; 16];
        for (i, byte) in uu.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
        }
        Some(Uuid { uu })
    }
}

impl From<[u8; 16]> for Uuid {
    fn from(uu: [u8; 16]) -> Self {
        Uuid { uu }
    }
}

impl Display for Uuid {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        let u = &self.uu;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-\
             {:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7], u[8], u[9], u[10], u[11], u[12],
            u[13], u[14], u[15]
        )
    }
}

impl Debug for Uuid {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Profiles whose connections are serialized per remote device.
#[derive(Clone, Debug, Hash, PartialEq, PartialOrd, Eq, Ord, FromPrimitive, ToPrimitive, Copy)]
#[repr(u32)]
pub enum Profile {
    Hfp,
    A2dp,
    Hid,
    Pbap,
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

pub struct UuidHelper {}

lazy_static! {
    // Any one of these advertised by the remote is enough to consider the profile present.
    static ref PROFILE_UUIDS: HashMap<Profile, Vec<Uuid>> = [
        (Profile::Hfp, vec![HSP, HFP]),
        (Profile::A2dp, vec![A2DP_SINK]),
        (Profile::Hid, vec![HID]),
        (Profile::Pbap, vec![PBAP_PSE]),
    ]
    .iter()
    .map(|(p, uuids)| (*p, uuids.iter().filter_map(Uuid::from_string).collect()))
    .collect();
}

impl UuidHelper {
    /// Returns the UUIDs that identify a profile on the remote side.
    pub fn get_profile_uuids(profile: &Profile) -> Vec<Uuid> {
        PROFILE_UUIDS.get(profile).cloned().unwrap_or_default()
    }

    /// Checks whether the remote's UUID list advertises the given profile.
    pub fn is_profile_present(profile: &Profile, remote_uuids: &[Uuid]) -> bool {
        Self::get_profile_uuids(profile).iter().any(|uuid| remote_uuids.contains(uuid))
    }

    /// Converts a UUID to the profile it identifies, if any.
    pub fn is_known_profile(uuid: &Uuid) -> Option<Profile> {
        PROFILE_UUIDS.iter().find(|(_, uuids)| uuids.contains(uuid)).map(|(p, _)| *p)
    }
}
