//! Handle-force curve reassembly.
//!
//! The force curve of a single stroke does not fit in one notification, so
//! the firmware streams it as a sequence of small frames: a 2-byte header
//! followed by little-endian f32 samples. A frame whose two header bytes
//! are equal marks the end of the current stroke's curve. Notification
//! order on a single characteristic is preserved by the transport, so no
//! reordering is attempted here.

use crate::monitor::types::{DecodeError, HandleForceCurve};

/// Buffers force frames until a stroke's terminator arrives.
#[derive(Debug, Default)]
pub struct ForceCurveAssembler {
    pending: Vec<f32>,
}

impl ForceCurveAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one force frame.
    ///
    /// Returns the completed curve when the frame carries the terminator
    /// marker, `None` while the stroke is still streaming. A terminator as
    /// the very first frame of a stroke yields a valid empty curve.
    pub fn push_frame(&mut self, frame: &[u8]) -> Result<Option<HandleForceCurve>, DecodeError> {
        if frame.len() < 2 {
            return Err(DecodeError::TooShort {
                got: frame.len(),
                need: 2,
            });
        }

        let payload = &frame[2..];
        if payload.len() % 4 != 0 {
            return Err(DecodeError::MisalignedForceFrame(payload.len()));
        }

        for chunk in payload.chunks_exact(4) {
            self.pending
                .push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        if frame[0] == frame[1] {
            Ok(Some(std::mem::take(&mut self.pending)))
        } else {
            Ok(None)
        }
    }

    /// Number of samples buffered for the in-flight stroke.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partially assembled curve, e.g. on disconnect.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(header: [u8; 2], samples: &[f32]) -> Vec<u8> {
        let mut out = header.to_vec();
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    #[test]
    fn multi_frame_curve_concatenates_in_order() {
        let mut assembler = ForceCurveAssembler::new();

        assert_eq!(
            assembler.push_frame(&frame([0, 1], &[1.0, 2.0])).unwrap(),
            None
        );
        assert_eq!(
            assembler.push_frame(&frame([1, 2], &[3.0])).unwrap(),
            None
        );
        assert_eq!(assembler.buffered(), 3);

        // Terminator frame's own samples are part of the curve
        let curve = assembler
            .push_frame(&frame([7, 7], &[4.0, 5.0]))
            .unwrap()
            .unwrap();
        assert_eq!(curve, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn terminator_first_yields_empty_curve() {
        let mut assembler = ForceCurveAssembler::new();
        let curve = assembler.push_frame(&[3, 3]).unwrap().unwrap();
        assert!(curve.is_empty());
    }

    #[test]
    fn buffer_resets_between_strokes() {
        let mut assembler = ForceCurveAssembler::new();
        assembler.push_frame(&frame([0, 1], &[9.0])).unwrap();
        assembler.push_frame(&frame([2, 2], &[])).unwrap().unwrap();

        // The next terminator-only frame must produce a fresh empty curve
        let next = assembler.push_frame(&[5, 5]).unwrap().unwrap();
        assert!(next.is_empty());
    }

    #[test]
    fn short_frame_rejected_without_losing_buffer() {
        let mut assembler = ForceCurveAssembler::new();
        assembler.push_frame(&frame([0, 1], &[1.5])).unwrap();
        assert!(assembler.push_frame(&[9]).is_err());
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn misaligned_payload_rejected() {
        let mut assembler = ForceCurveAssembler::new();
        assert!(assembler.push_frame(&[0, 1, 0xAA, 0xBB]).is_err());
    }
}
