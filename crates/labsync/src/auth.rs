//! Terminal identity and lab-room authorization.
//!
//! Kiosk terminals identify themselves as `<lab>rm<room>`, for example
//! `swlab1rm2`. The identity is parsed case-insensitively and checked
//! against the configured lab roster before the engine serves any session
//! data for that terminal.

use crate::config::Config;
use crate::error::{Error, Result};

/// A parsed kiosk terminal identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalIdentity {
    /// Lab name, normalized to upper case.
    pub lab_name: String,
    /// Room number within the lab.
    pub room: u16,
}

impl TerminalIdentity {
    /// Parse an identity string of the shape `<lab>rm<room>`.
    ///
    /// Matching is case-insensitive; the last `rm` followed by digits is
    /// the separator, so lab names containing `rm` earlier still parse.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentity`] when the string has no `rm`
    /// separator, an empty lab part, or a non-numeric room part.
    pub fn parse(identity: &str) -> Result<Self> {
        let lowered = identity.trim().to_lowercase();

        let sep = lowered.rfind("rm").ok_or_else(|| Error::InvalidIdentity {
            identity: identity.to_string(),
        })?;

        let lab_part = &lowered[..sep];
        let room_part = &lowered[sep + 2..];

        if lab_part.is_empty() || room_part.is_empty() {
            return Err(Error::InvalidIdentity {
                identity: identity.to_string(),
            });
        }

        let room: u16 = room_part.parse().map_err(|_| Error::InvalidIdentity {
            identity: identity.to_string(),
        })?;

        Ok(Self {
            lab_name: lab_part.to_uppercase(),
            room,
        })
    }

    /// Check this identity against the configured lab roster.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unauthorized`] when the lab is unknown or the room
    /// is not listed for it.
    pub fn authorize(&self, config: &Config) -> Result<()> {
        let rooms = config.rooms_for(&self.lab_name).ok_or_else(|| {
            Error::unauthorized(format!("unknown lab {}", self.lab_name))
        })?;

        if !rooms.contains(&self.room) {
            return Err(Error::unauthorized(format!(
                "room {} is not part of {}",
                self.room, self.lab_name
            )));
        }

        Ok(())
    }

    /// Whether this terminal may see data for the given lab and room.
    #[must_use]
    pub fn can_access(&self, lab_name: &str, room: u16) -> bool {
        self.lab_name.eq_ignore_ascii_case(lab_name) && self.room == room
    }
}

impl std::fmt::Display for TerminalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}rm{}", self.lab_name.to_lowercase(), self.room)
    }
}
