//! DRM event records
//!
//! A read on a DRM node returns zero or more complete event records, each
//! starting with a `{type: u32, length: u32}` header. Records are laid out in
//! native byte order.

/// `struct drm_event` header size
pub const EVENT_HEADER_SIZE: usize = 8;
/// `struct drm_event_vblank` size (vblank and flip-complete)
pub const VBLANK_EVENT_SIZE: usize = 32;
/// `struct drm_sprd_ipp_event` size
pub const IPP_EVENT_SIZE: usize = 40;

pub const DRM_EVENT_VBLANK: u32 = 0x01;
pub const DRM_EVENT_FLIP_COMPLETE: u32 = 0x02;
pub const DRM_SPRD_IPP_EVENT: u32 = 0x8000_0002;

/// IPP completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IppEvent {
    pub user_data: u64,
    pub tv_sec: u32,
    pub tv_usec: u32,
    /// Job (property) id that completed
    pub job: u32,
    /// Completed buffer indices, `[src, dst]`
    pub buf_id: [u32; 2],
}

impl IppEvent {
    fn parse(record: &[u8]) -> Self {
        Self {
            user_data: read_u64(record, 8),
            tv_sec: read_u32(record, 16),
            tv_usec: read_u32(record, 20),
            job: read_u32(record, 24),
            buf_id: [read_u32(record, 32), read_u32(record, 36)],
        }
    }

    /// Serialize as the kernel would deliver it
    pub fn encode(&self) -> [u8; IPP_EVENT_SIZE] {
        let mut out = [0u8; IPP_EVENT_SIZE];
        out[0..4].copy_from_slice(&DRM_SPRD_IPP_EVENT.to_ne_bytes());
        out[4..8].copy_from_slice(&(IPP_EVENT_SIZE as u32).to_ne_bytes());
        out[8..16].copy_from_slice(&self.user_data.to_ne_bytes());
        out[16..20].copy_from_slice(&self.tv_sec.to_ne_bytes());
        out[20..24].copy_from_slice(&self.tv_usec.to_ne_bytes());
        out[24..28].copy_from_slice(&self.job.to_ne_bytes());
        // 28..32 reserved
        out[32..36].copy_from_slice(&self.buf_id[0].to_ne_bytes());
        out[36..40].copy_from_slice(&self.buf_id[1].to_ne_bytes());
        out
    }
}

/// Vblank or page-flip completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankEvent {
    pub user_data: u64,
    pub tv_sec: u32,
    pub tv_usec: u32,
    pub sequence: u32,
    pub crtc_id: u32,
}

impl VblankEvent {
    fn parse(record: &[u8]) -> Self {
        Self {
            user_data: read_u64(record, 8),
            tv_sec: read_u32(record, 16),
            tv_usec: read_u32(record, 20),
            sequence: read_u32(record, 24),
            crtc_id: read_u32(record, 28),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmEvent {
    Vblank(VblankEvent),
    FlipComplete(VblankEvent),
    Ipp(IppEvent),
    Unknown { kind: u32, length: u32 },
}

/// Split a read buffer into event records.
///
/// Parsing stops at the first malformed record (length shorter than its
/// header or running past the end of `buf`); everything before it is kept.
pub fn parse_events(buf: &[u8]) -> Vec<DrmEvent> {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let rest = &buf[offset..];
        if rest.len() < EVENT_HEADER_SIZE {
            tracing::warn!("{} trailing bytes are shorter than a drm_event", rest.len());
            break;
        }

        let kind = read_u32(rest, 0);
        let length = read_u32(rest, 4);
        let len = length as usize;
        if len < EVENT_HEADER_SIZE || len > rest.len() {
            tracing::warn!(
                "malformed drm_event type {:#x} length {} ({} bytes left)",
                kind,
                length,
                rest.len()
            );
            break;
        }

        let record = &rest[..len];
        let event = match kind {
            DRM_EVENT_VBLANK if len >= VBLANK_EVENT_SIZE => {
                DrmEvent::Vblank(VblankEvent::parse(record))
            }
            DRM_EVENT_FLIP_COMPLETE if len >= VBLANK_EVENT_SIZE => {
                DrmEvent::FlipComplete(VblankEvent::parse(record))
            }
            DRM_SPRD_IPP_EVENT if len >= IPP_EVENT_SIZE => DrmEvent::Ipp(IppEvent::parse(record)),
            _ => DrmEvent::Unknown { kind, length },
        };
        events.push(event);
        offset += len;
    }

    events
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_ne_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vblank_record(kind: u32, sequence: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(VBLANK_EVENT_SIZE);
        out.extend_from_slice(&kind.to_ne_bytes());
        out.extend_from_slice(&(VBLANK_EVENT_SIZE as u32).to_ne_bytes());
        out.extend_from_slice(&7u64.to_ne_bytes());
        out.extend_from_slice(&1u32.to_ne_bytes());
        out.extend_from_slice(&2u32.to_ne_bytes());
        out.extend_from_slice(&sequence.to_ne_bytes());
        out.extend_from_slice(&31u32.to_ne_bytes());
        out
    }

    fn ipp(job: u32, index: u32) -> IppEvent {
        IppEvent {
            user_data: 3,
            tv_sec: 10,
            tv_usec: 20,
            job,
            buf_id: [index, index],
        }
    }

    #[test]
    fn test_ipp_event_parse() {
        let event = ipp(5, 1);
        assert_eq!(parse_events(&event.encode()), vec![DrmEvent::Ipp(event)]);
    }

    #[test]
    fn test_concatenated_records() {
        let mut buf = vblank_record(DRM_EVENT_VBLANK, 99);
        buf.extend_from_slice(&ipp(1, 0).encode());
        buf.extend_from_slice(&vblank_record(DRM_EVENT_FLIP_COMPLETE, 100));
        buf.extend_from_slice(&ipp(2, 4).encode());

        let events = parse_events(&buf);
        assert_eq!(events.len(), 4);
        match events[0] {
            DrmEvent::Vblank(v) => {
                assert_eq!(v.sequence, 99);
                assert_eq!(v.crtc_id, 31);
                assert_eq!(v.user_data, 7);
            }
            other => panic!("expected vblank, got {:?}", other),
        }
        assert!(matches!(events[2], DrmEvent::FlipComplete(_)));
        assert_eq!(events[3], DrmEvent::Ipp(ipp(2, 4)));
    }

    #[test]
    fn test_unknown_record_skipped_by_length() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x1234u32.to_ne_bytes());
        buf.extend_from_slice(&12u32.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&ipp(9, 2).encode());

        let events = parse_events(&buf);
        assert_eq!(
            events,
            vec![
                DrmEvent::Unknown {
                    kind: 0x1234,
                    length: 12
                },
                DrmEvent::Ipp(ipp(9, 2)),
            ]
        );
    }

    #[test]
    fn test_truncated_record_stops_parsing() {
        let mut buf = ipp(1, 0).encode().to_vec();
        let second = ipp(2, 1).encode();
        buf.extend_from_slice(&second[..20]);
        assert_eq!(parse_events(&buf), vec![DrmEvent::Ipp(ipp(1, 0))]);
    }

    #[test]
    fn test_zero_length_record_stops_parsing() {
        let mut buf = vec![0u8; 16];
        buf[0..4].copy_from_slice(&DRM_SPRD_IPP_EVENT.to_ne_bytes());
        assert!(parse_events(&buf).is_empty());
        assert!(parse_events(&[]).is_empty());
        assert!(parse_events(&[1, 2, 3]).is_empty());
    }
}
