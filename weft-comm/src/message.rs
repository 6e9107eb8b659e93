use std::sync::Mutex;

use thiserror::Error;

use crate::transport::{LocaleId, Tag, DATA_TAG_LIMIT};

/// Operation kinds dispatched by the poller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MsgKind {
    Put = 0,
    Get = 1,
    Fork = 2,
    ForkNb = 3,
    Finish = 4,
    BroadcastPrivate = 5,
}

impl MsgKind {
    fn from_u8(v: u8) -> Option<MsgKind> {
        Some(match v {
            0 => MsgKind::Put,
            1 => MsgKind::Get,
            2 => MsgKind::Fork,
            3 => MsgKind::ForkNb,
            4 => MsgKind::Finish,
            5 => MsgKind::BroadcastPrivate,
            _ => return None,
        })
    }
}

/// The envelope's address-or-function-id payload, discriminated by the
/// operation kind: puts and gets carry the remote address, forks carry the
/// function id, broadcast-private overloads the function id as the table
/// index, finish carries nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    None,
    Addr(u64),
    Fn(u32),
}

impl Target {
    pub fn addr(self) -> u64 {
        match self {
            Target::Addr(a) => a,
            other => panic!("envelope target is not an address: {other:?}"),
        }
    }

    pub fn fn_id(self) -> u32 {
        match self {
            Target::Fn(f) => f,
            other => panic!("envelope target is not a function id: {other:?}"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),
    #[error("truncated envelope: {0} bytes")]
    Truncated(usize),
}

/// Fixed-shape metadata message preceding every raw transfer: operation
/// kind, reply tag, payload size, and the address-or-function-id the
/// receiver needs to size and route the ensuing bytes.
///
/// Wire form is 16 bytes, little-endian: kind and reply tag packed into the
/// first word (4 + 27 bits, mirroring the transport's tag width), payload
/// size in the second, target in the remaining eight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub kind: MsgKind,
    pub reply_tag: Tag,
    pub size: u32,
    pub target: Target,
}

impl Envelope {
    pub const WIRE_LEN: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        let word0 = (self.kind as u32) | (self.reply_tag << 4);
        out[0..4].copy_from_slice(&word0.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        let target = match self.target {
            Target::None => 0u64,
            Target::Addr(a) => a,
            Target::Fn(f) => u64::from(f),
        };
        out[8..16].copy_from_slice(&target.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Envelope, CodecError> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(CodecError::Truncated(bytes.len()));
        }
        let word0 = u32::from_le_bytes(bytes[0..4].try_into().expect("sized slice"));
        let kind_bits = (word0 & 0xF) as u8;
        let kind = MsgKind::from_u8(kind_bits).ok_or(CodecError::UnknownKind(kind_bits))?;
        let reply_tag = word0 >> 4;
        let size = u32::from_le_bytes(bytes[4..8].try_into().expect("sized slice"));
        let raw_target = u64::from_le_bytes(bytes[8..16].try_into().expect("sized slice"));
        let target = match kind {
            MsgKind::Put | MsgKind::Get => Target::Addr(raw_target),
            MsgKind::Fork | MsgKind::ForkNb | MsgKind::BroadcastPrivate => {
                Target::Fn(raw_target as u32)
            }
            MsgKind::Finish => Target::None,
        };
        Ok(Envelope {
            kind,
            reply_tag,
            size,
            target,
        })
    }
}

/// Reply-tag mint: a monotonic counter salted with the destination locale
/// and the calling thread's low bits, wrapped to stay below the reserved
/// tag band. No two concurrent operations on the same locale pair may
/// collide, since the transport routes by tag match alone.
pub struct TagGen {
    next: Mutex<Tag>,
}

impl Default for TagGen {
    fn default() -> Self {
        TagGen {
            next: Mutex::new(1),
        }
    }
}

impl TagGen {
    pub fn mint(&self, dest: LocaleId) -> Tag {
        let thread_salt = {
            use std::hash::{DefaultHasher, Hash, Hasher};
            let mut h = DefaultHasher::new();
            std::thread::current().id().hash(&mut h);
            (h.finish() & 0x7F) as Tag
        };
        let mut next = self.next.lock().expect("tag lock poisoned");
        let raw = *next + (dest as Tag) * 1000 + thread_salt * 100;
        *next += 1;
        if *next >= DATA_TAG_LIMIT {
            *next = 1;
        }
        1 + raw % DATA_TAG_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TAG_MASK;

    #[test]
    fn envelope_round_trips_every_kind() {
        let cases = [
            (MsgKind::Put, Target::Addr(0xDEAD_BEEF_0BAD_F00D)),
            (MsgKind::Get, Target::Addr(64)),
            (MsgKind::Fork, Target::Fn(7)),
            (MsgKind::ForkNb, Target::Fn(12)),
            (MsgKind::Finish, Target::None),
            (MsgKind::BroadcastPrivate, Target::Fn(1)),
        ];
        for (kind, target) in cases {
            let env = Envelope {
                kind,
                reply_tag: 123_456,
                size: 64,
                target,
            };
            let decoded = Envelope::from_bytes(&env.to_bytes()).expect("decode");
            assert_eq!(decoded, env);
        }
    }

    #[test]
    fn envelope_rejects_unknown_kinds_and_short_input() {
        let mut bytes = [0u8; Envelope::WIRE_LEN];
        bytes[0] = 0x0F;
        assert_eq!(Envelope::from_bytes(&bytes), Err(CodecError::UnknownKind(15)));
        assert_eq!(
            Envelope::from_bytes(&bytes[..7]),
            Err(CodecError::Truncated(7))
        );
    }

    #[test]
    fn reply_tag_width_survives_the_packed_word() {
        let env = Envelope {
            kind: MsgKind::Get,
            reply_tag: TAG_MASK,
            size: 0,
            target: Target::Addr(0),
        };
        let decoded = Envelope::from_bytes(&env.to_bytes()).expect("decode");
        assert_eq!(decoded.reply_tag, TAG_MASK);
    }

    #[test]
    fn minted_tags_stay_in_band_and_do_not_repeat() {
        let tags = TagGen::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let t = tags.mint(3);
            assert!(t >= 1 && t <= DATA_TAG_LIMIT, "tag {t} out of band");
            assert!(seen.insert(t), "tag {t} repeated");
        }
    }

    #[test]
    fn mint_wraps_instead_of_entering_the_reserved_band() {
        let tags = TagGen::default();
        *tags.next.lock().unwrap() = DATA_TAG_LIMIT - 2;
        for _ in 0..8 {
            let t = tags.mint(0);
            assert!(t >= 1 && t <= DATA_TAG_LIMIT);
        }
    }
}
