//! Minimal H.264 Annex-B elementary stream synthesis.
//!
//! Produces a Baseline sequence/picture parameter set pair for a given frame
//! size and slice NAL units whose headers parse against them. Macroblock
//! data is filler: the output satisfies stream parsers and container
//! writers, not decoders.

const START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_SLICE: u8 = 0x41;
const NAL_IDR_SLICE: u8 = 0x65;
const NAL_SPS: u8 = 0x67;
const NAL_PPS: u8 = 0x68;

const PROFILE_BASELINE: u8 = 66;
const CONSTRAINT_FLAGS: u8 = 0xc0;
const LEVEL_4_0: u8 = 40;

/// `log2_max_frame_num_minus4` in the generated SPS.
const LOG2_MAX_FRAME_NUM: u32 = 4;

const SLICE_TYPE_P: u32 = 5;
const SLICE_TYPE_I: u32 = 7;

#[derive(Default)]
struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    used: u8,
}

impl BitWriter {
    fn bit(&mut self, set: bool) {
        self.current = (self.current << 1) | u8::from(set);
        self.used += 1;
        if self.used == 8 {
            self.bytes.push(self.current);
            self.current = 0;
            self.used = 0;
        }
    }

    fn bits(&mut self, value: u32, count: u32) {
        for shift in (0..count).rev() {
            self.bit((value >> shift) & 1 == 1);
        }
    }

    fn byte(&mut self, value: u8) {
        self.bits(u32::from(value), 8);
    }

    /// Unsigned Exp-Golomb.
    fn ue(&mut self, value: u32) {
        let coded = u64::from(value) + 1;
        let len = 64 - coded.leading_zeros();
        self.bits(0, len - 1);
        for shift in (0..len).rev() {
            self.bit((coded >> shift) & 1 == 1);
        }
    }

    /// Signed Exp-Golomb.
    fn se(&mut self, value: i32) {
        let mapped = if value > 0 {
            (value as u32) * 2 - 1
        } else {
            value.unsigned_abs() * 2
        };
        self.ue(mapped);
    }

    /// `rbsp_trailing_bits`: a stop bit, then zero-align.
    fn finish(mut self) -> Vec<u8> {
        self.bit(true);
        while self.used != 0 {
            self.bit(false);
        }
        self.bytes
    }
}

/// Wrap an RBSP into a start-code-prefixed NAL unit, inserting emulation
/// prevention bytes.
fn nal_unit(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rbsp.len() + 8);
    out.extend_from_slice(&START_CODE);
    out.push(header);
    let mut zeros = 0;
    for &byte in rbsp {
        if zeros == 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
    out
}

fn sequence_parameter_set(width: u32, height: u32) -> Vec<u8> {
    let width_mbs = width.max(1).div_ceil(16);
    let height_mbs = height.max(1).div_ceil(16);
    // Crop units are two pixels for 4:2:0 progressive frames.
    let crop_right = (width_mbs * 16 - width.max(1)) / 2;
    let crop_bottom = (height_mbs * 16 - height.max(1)) / 2;

    let mut w = BitWriter::default();
    w.byte(PROFILE_BASELINE);
    w.byte(CONSTRAINT_FLAGS);
    w.byte(LEVEL_4_0);
    w.ue(0); // seq_parameter_set_id
    w.ue(LOG2_MAX_FRAME_NUM - 4);
    w.ue(2); // pic_order_cnt_type: output order equals decode order
    w.ue(1); // max_num_ref_frames
    w.bit(false); // gaps_in_frame_num_value_allowed_flag
    w.ue(width_mbs - 1);
    w.ue(height_mbs - 1);
    w.bit(true); // frame_mbs_only_flag
    w.bit(true); // direct_8x8_inference_flag
    let cropped = crop_right != 0 || crop_bottom != 0;
    w.bit(cropped);
    if cropped {
        w.ue(0);
        w.ue(crop_right);
        w.ue(0);
        w.ue(crop_bottom);
    }
    w.bit(false); // vui_parameters_present_flag
    nal_unit(NAL_SPS, &w.finish())
}

fn picture_parameter_set() -> Vec<u8> {
    let mut w = BitWriter::default();
    w.ue(0); // pic_parameter_set_id
    w.ue(0); // seq_parameter_set_id
    w.bit(false); // CAVLC
    w.bit(false); // bottom_field_pic_order_in_frame_present_flag
    w.ue(0); // num_slice_groups_minus1
    w.ue(0); // num_ref_idx_l0_default_active_minus1
    w.ue(0); // num_ref_idx_l1_default_active_minus1
    w.bit(false); // weighted_pred_flag
    w.bits(0, 2); // weighted_bipred_idc
    w.se(0); // pic_init_qp_minus26
    w.se(0); // pic_init_qs_minus26
    w.se(0); // chroma_qp_index_offset
    w.bit(true); // deblocking_filter_control_present_flag
    w.bit(false); // constrained_intra_pred_flag
    w.bit(false); // redundant_pic_cnt_present_flag
    nal_unit(NAL_PPS, &w.finish())
}

/// SPS followed by PPS for a `width` x `height` stream.
pub fn parameter_sets(width: u32, height: u32) -> Vec<u8> {
    let mut out = sequence_parameter_set(width, height);
    out.extend(picture_parameter_set());
    out
}

/// One access unit holding a single slice.
///
/// `frame_num` counts frames since the last IDR. Key frames are IDR
/// I-slices, everything else a P-slice. `filler` bytes of macroblock
/// payload follow the header.
pub fn access_unit(key_frame: bool, frame_num: u64, filler: usize) -> Vec<u8> {
    let mut w = BitWriter::default();
    w.ue(0); // first_mb_in_slice
    w.ue(if key_frame { SLICE_TYPE_I } else { SLICE_TYPE_P });
    w.ue(0); // pic_parameter_set_id
    let max_frame_num = 1u64 << LOG2_MAX_FRAME_NUM;
    w.bits((frame_num % max_frame_num) as u32, LOG2_MAX_FRAME_NUM);
    if key_frame {
        w.ue(0); // idr_pic_id
    } else {
        w.bit(false); // num_ref_idx_active_override_flag
        w.bit(false); // ref_pic_list_modification_flag_l0
    }
    // dec_ref_pic_marking
    w.bit(false);
    if key_frame {
        w.bit(false);
    }
    w.se(0); // slice_qp_delta
    w.ue(1); // disable_deblocking_filter_idc
    for i in 0..filler {
        w.byte(0x80 | (i % 0x7f) as u8);
    }
    let header = if key_frame { NAL_IDR_SLICE } else { NAL_SLICE };
    nal_unit(header, &w.finish())
}
