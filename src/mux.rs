//! Payload multiplexer (SPEC_FULL §4.4 / C4): interleaves multiple items'
//! ciphertext into one payload stream, staged through a ring buffer so an
//! item's output can be sliced into CSPRNG-chosen stripes without
//! re-buffering the whole item in memory. `PayloadDemultiplexer` is the
//! reader-side counterpart: given the same scheme, seed, and each item's
//! final ciphertext length, it replays the identical sequence of
//! select/draw decisions to pull the interleaved stream back apart.

use std::collections::VecDeque;
use std::io::{Read, Write};

use crate::entropy::MuxEntropy;
use crate::error::{PackageError, Result};
use crate::model::LayoutScheme;

/// Per-item staging buffer plus completion state, tracked by the
/// multiplexer across interleaved writes.
struct ItemStage {
    ring: VecDeque<u8>,
    finished: bool,
}

impl ItemStage {
    fn new() -> Self {
        ItemStage { ring: VecDeque::new(), finished: false }
    }
}

fn select_pending(pending: &[usize], scheme: LayoutScheme, entropy: &mut MuxEntropy) -> Result<Option<usize>> {
    if pending.is_empty() {
        return Ok(None);
    }
    match scheme {
        LayoutScheme::Simple => Ok(Some(pending[0])),
        LayoutScheme::Frameshift { .. } | LayoutScheme::Fabric { .. } => {
            let choice = entropy.next(0, pending.len() as u32 - 1)?;
            Ok(Some(pending[choice as usize]))
        }
    }
}

/// Drives `LayoutScheme::{Simple, Frameshift, Fabric}` while writing the
/// interleaved ciphertext of `item_count` items to an underlying sink.
/// Every item's bytes must be staged through `stage` before `tick` drains
/// them in the scheme's chosen order (SPEC_FULL §4.4).
///
/// Simple writes one whole item at a time, in order. Frameshift writes one
/// whole item at a time in CSPRNG-chosen order, with opaque padding bytes
/// inserted after each (SPEC_FULL glossary: "Frameshift padding"). Fabric
/// writes a CSPRNG-chosen-length stripe of the chosen item, possibly
/// returning to the same item many times before it is exhausted.
pub struct PayloadMultiplexer<W> {
    sink: W,
    scheme: LayoutScheme,
    entropy: MuxEntropy,
    stages: Vec<ItemStage>,
    bytes_written: u64,
}

impl<W: Write> PayloadMultiplexer<W> {
    pub fn new(sink: W, scheme: LayoutScheme, entropy: MuxEntropy, item_count: usize) -> Result<Self> {
        scheme.validate()?;
        Ok(PayloadMultiplexer {
            sink,
            scheme,
            entropy,
            stages: (0..item_count).map(|_| ItemStage::new()).collect(),
            bytes_written: 0,
        })
    }

    /// Appends ciphertext bytes for `item_index` to its staging ring,
    /// without writing anything to the sink yet.
    pub fn stage(&mut self, item_index: usize, bytes: &[u8]) -> Result<()> {
        let stage = self.stages.get_mut(item_index).ok_or_else(|| {
            PackageError::invalid_state(format!("no such item index {item_index} in multiplexer"))
        })?;
        if stage.finished {
            return Err(PackageError::invalid_state("cannot stage bytes for a finished item"));
        }
        stage.ring.extend(bytes);
        Ok(())
    }

    pub fn mark_finished(&mut self, item_index: usize) -> Result<()> {
        let stage = self.stages.get_mut(item_index).ok_or_else(|| {
            PackageError::invalid_state(format!("no such item index {item_index} in multiplexer"))
        })?;
        stage.finished = true;
        Ok(())
    }

    /// Draws one layout decision and drains the chosen slice of staged
    /// bytes to the sink. Returns `Ok(false)` once every item is finished
    /// and drained (SPEC_FULL §4.4 invariant: select-index, then
    /// draw-length, then byte ops, in that order, every tick).
    pub fn tick(&mut self) -> Result<bool> {
        let pending = self.pending_indices();
        let Some(item_index) = select_pending(&pending, self.scheme, &mut self.entropy)? else {
            return Ok(false);
        };
        match self.scheme {
            LayoutScheme::Simple => {
                let available = self.stages[item_index].ring.len();
                self.drain(item_index, available)?;
            }
            LayoutScheme::Frameshift { min_pad, max_pad } => {
                let available = self.stages[item_index].ring.len();
                self.drain(item_index, available)?;
                let pad_len = self.entropy.next(min_pad, max_pad)? as usize;
                self.write_padding(pad_len)?;
            }
            LayoutScheme::Fabric { min_stripe, max_stripe } => {
                let stripe = self.entropy.next(min_stripe, max_stripe)? as usize;
                let available = self.stages[item_index].ring.len();
                self.drain(item_index, available.min(stripe))?;
            }
        }
        Ok(true)
    }

    pub fn run_to_completion(&mut self) -> Result<()> {
        while self.tick()? {}
        Ok(())
    }

    fn pending_indices(&self) -> Vec<usize> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.finished || !s.ring.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    fn drain(&mut self, item_index: usize, len: usize) -> Result<()> {
        let stage = &mut self.stages[item_index];
        let mut chunk = Vec::with_capacity(len);
        for _ in 0..len {
            match stage.ring.pop_front() {
                Some(b) => chunk.push(b),
                None => break,
            }
        }
        self.sink.write_all(&chunk)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Writes opaque CSPRNG bytes not attributable to any item (SPEC_FULL
    /// glossary: "Frameshift padding"). These bytes are never staged and
    /// never appear in any item's ciphertext; the reader must skip exactly
    /// this many bytes at the matching point in its own replay.
    fn write_padding(&mut self, len: usize) -> Result<()> {
        let mut pad = vec![0u8; len];
        self.entropy.next_bytes(&mut pad);
        self.sink.write_all(&pad)?;
        self.bytes_written += pad.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W> Drop for PayloadMultiplexer<W> {
    /// An item left staged-but-undrained when the multiplexer is dropped
    /// indicates a caller bug (forgot to `run_to_completion`), not a
    /// recoverable condition — there is nowhere left to send the bytes.
    fn drop(&mut self) {
        let incomplete = self.stages.iter().filter(|s| !s.ring.is_empty()).count();
        if incomplete > 0 {
            tracing::warn!(incomplete, "payload multiplexer dropped with staged bytes undrained");
        }
    }
}

/// Reassembles per-item ciphertext from a stream `PayloadMultiplexer`
/// produced, by replaying the identical selection and length draws against
/// the same CSPRNG seed (SPEC_FULL §8: `demux(mux(items, seed)) == items`).
///
/// This only reproduces the writer's decisions correctly if every item was
/// *fully staged* before the writer began draining — `PayloadMultiplexer`'s
/// choices depend on how many bytes were staged at the moment of each draw,
/// and this type only knows each item's final total length.
pub struct PayloadDemultiplexer<R> {
    source: R,
    scheme: LayoutScheme,
    entropy: MuxEntropy,
    remaining: Vec<u64>,
    buffers: Vec<Vec<u8>>,
}

impl<R: Read> PayloadDemultiplexer<R> {
    pub fn new(source: R, scheme: LayoutScheme, entropy: MuxEntropy, internal_lengths: &[u64]) -> Result<Self> {
        scheme.validate()?;
        Ok(PayloadDemultiplexer {
            source,
            scheme,
            entropy,
            remaining: internal_lengths.to_vec(),
            buffers: internal_lengths.iter().map(|_| Vec::new()).collect(),
        })
    }

    pub fn run_to_completion(&mut self) -> Result<()> {
        while self.tick()? {}
        Ok(())
    }

    fn tick(&mut self) -> Result<bool> {
        let pending: Vec<usize> =
            self.remaining.iter().enumerate().filter(|(_, &r)| r > 0).map(|(i, _)| i).collect();
        let Some(item_index) = select_pending(&pending, self.scheme, &mut self.entropy)? else {
            return Ok(false);
        };
        match self.scheme {
            LayoutScheme::Simple => {
                let len = self.remaining[item_index] as usize;
                self.pull(item_index, len)?;
            }
            LayoutScheme::Frameshift { min_pad, max_pad } => {
                let len = self.remaining[item_index] as usize;
                self.pull(item_index, len)?;
                let pad_len = self.entropy.next(min_pad, max_pad)? as usize;
                self.skip_padding(pad_len)?;
            }
            LayoutScheme::Fabric { min_stripe, max_stripe } => {
                let stripe = self.entropy.next(min_stripe, max_stripe)? as usize;
                let available = self.remaining[item_index] as usize;
                self.pull(item_index, available.min(stripe))?;
            }
        }
        Ok(true)
    }

    fn pull(&mut self, item_index: usize, len: usize) -> Result<()> {
        let mut chunk = vec![0u8; len];
        self.source.read_exact(&mut chunk)?;
        self.remaining[item_index] -= len as u64;
        self.buffers[item_index].extend_from_slice(&chunk);
        Ok(())
    }

    fn skip_padding(&mut self, len: usize) -> Result<()> {
        let mut discard = vec![0u8; len];
        self.source.read_exact(&mut discard)?;
        Ok(())
    }

    /// Consumes the demultiplexer, returning each item's reconstructed
    /// ciphertext in manifest order.
    pub fn into_items(self) -> Vec<Vec<u8>> {
        self.buffers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CsprngCipherName, CsprngConfiguration};

    fn entropy() -> MuxEntropy {
        MuxEntropy::new(&CsprngConfiguration {
            cipher: CsprngCipherName::Salsa20,
            key: vec![1u8; 32],
            nonce: vec![2u8; 8],
        })
        .unwrap()
    }

    fn entropy_with(key: u8, nonce: u8) -> MuxEntropy {
        MuxEntropy::new(&CsprngConfiguration {
            cipher: CsprngCipherName::Salsa20,
            key: vec![key; 32],
            nonce: vec![nonce; 8],
        })
        .unwrap()
    }

    #[test]
    fn simple_scheme_preserves_item_order() {
        let sink = Vec::new();
        let mut mux = PayloadMultiplexer::new(sink, LayoutScheme::Simple, entropy(), 2).unwrap();
        mux.stage(0, b"AAAA").unwrap();
        mux.mark_finished(0).unwrap();
        mux.stage(1, b"BBBB").unwrap();
        mux.mark_finished(1).unwrap();
        mux.run_to_completion().unwrap();
        assert_eq!(mux.into_inner(), b"AAAABBBB");
    }

    #[test]
    fn fabric_scheme_drains_all_staged_bytes() {
        let sink = Vec::new();
        let mut mux =
            PayloadMultiplexer::new(sink, LayoutScheme::Fabric { min_stripe: 8, max_stripe: 32 }, entropy(), 3)
                .unwrap();
        for i in 0..3 {
            mux.stage(i, &vec![i as u8; 200]).unwrap();
            mux.mark_finished(i).unwrap();
        }
        mux.run_to_completion().unwrap();
        let out = mux.into_inner();
        assert_eq!(out.len(), 600);
    }

    #[test]
    fn fabric_scheme_rejects_out_of_range_stripes() {
        let sink = Vec::new();
        let result = PayloadMultiplexer::new(sink, LayoutScheme::Fabric { min_stripe: 4, max_stripe: 32 }, entropy(), 1);
        assert!(result.is_err());
    }

    #[test]
    fn frameshift_scheme_inflates_output_with_padding() {
        let sink = Vec::new();
        let mut mux = PayloadMultiplexer::new(
            sink,
            LayoutScheme::Frameshift { min_pad: 16, max_pad: 64 },
            entropy(),
            2,
        )
        .unwrap();
        mux.stage(0, &vec![0xaau8; 50]).unwrap();
        mux.mark_finished(0).unwrap();
        mux.stage(1, &vec![0xbbu8; 50]).unwrap();
        mux.mark_finished(1).unwrap();
        mux.run_to_completion().unwrap();
        let out = mux.into_inner();
        // 100 ciphertext bytes plus at least 16 bytes of padding per item.
        assert!(out.len() >= 100 + 32, "expected padding to inflate output, got {} bytes", out.len());
    }

    #[test]
    fn demultiplexer_reconstructs_simple_scheme_items() {
        let items: Vec<Vec<u8>> = vec![vec![1u8; 37], vec![2u8; 91]];
        let sink = Vec::new();
        let mut mux = PayloadMultiplexer::new(sink, LayoutScheme::Simple, entropy_with(5, 6), 2).unwrap();
        for (i, item) in items.iter().enumerate() {
            mux.stage(i, item).unwrap();
            mux.mark_finished(i).unwrap();
        }
        mux.run_to_completion().unwrap();
        let payload = mux.into_inner();

        let lengths: Vec<u64> = items.iter().map(|i| i.len() as u64).collect();
        let mut demux =
            PayloadDemultiplexer::new(payload.as_slice(), LayoutScheme::Simple, entropy_with(5, 6), &lengths)
                .unwrap();
        demux.run_to_completion().unwrap();
        assert_eq!(demux.into_items(), items);
    }

    #[test]
    fn demultiplexer_reconstructs_fabric_scheme_items() {
        let items: Vec<Vec<u8>> = vec![vec![1u8; 300], vec![2u8; 150], vec![3u8; 77]];
        let scheme = LayoutScheme::Fabric { min_stripe: 8, max_stripe: 40 };
        let sink = Vec::new();
        let mut mux = PayloadMultiplexer::new(sink, scheme, entropy_with(9, 1), items.len()).unwrap();
        for (i, item) in items.iter().enumerate() {
            mux.stage(i, item).unwrap();
            mux.mark_finished(i).unwrap();
        }
        mux.run_to_completion().unwrap();
        let payload = mux.into_inner();

        let lengths: Vec<u64> = items.iter().map(|i| i.len() as u64).collect();
        let mut demux = PayloadDemultiplexer::new(payload.as_slice(), scheme, entropy_with(9, 1), &lengths).unwrap();
        demux.run_to_completion().unwrap();
        assert_eq!(demux.into_items(), items);
    }

    #[test]
    fn demultiplexer_reconstructs_frameshift_scheme_items() {
        let items: Vec<Vec<u8>> = vec![vec![7u8; 64], vec![8u8; 120]];
        let scheme = LayoutScheme::Frameshift { min_pad: 4, max_pad: 20 };
        let sink = Vec::new();
        let mut mux = PayloadMultiplexer::new(sink, scheme, entropy_with(3, 4), items.len()).unwrap();
        for (i, item) in items.iter().enumerate() {
            mux.stage(i, item).unwrap();
            mux.mark_finished(i).unwrap();
        }
        mux.run_to_completion().unwrap();
        let payload = mux.into_inner();

        let lengths: Vec<u64> = items.iter().map(|i| i.len() as u64).collect();
        let mut demux = PayloadDemultiplexer::new(payload.as_slice(), scheme, entropy_with(3, 4), &lengths).unwrap();
        demux.run_to_completion().unwrap();
        assert_eq!(demux.into_items(), items);
    }

    proptest::proptest! {
        /// Whatever scheme interleaves the bytes, no byte is ever dropped or
        /// duplicated: total output length is always at least the total
        /// staged length (SPEC_FULL §4.4 C4); Frameshift additionally adds
        /// padding on top.
        #[test]
        fn fabric_scheme_never_loses_or_duplicates_bytes(
            chunks in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..300), 1..6),
            min_stripe in 8u32..100,
            pad in 0u32..32_668,
        ) {
            let max_stripe = min_stripe + pad;
            let sink = Vec::new();
            let mut mux = PayloadMultiplexer::new(
                sink,
                LayoutScheme::Fabric { min_stripe, max_stripe },
                entropy(),
                chunks.len(),
            )
            .unwrap();
            let total: usize = chunks.iter().map(|c| c.len()).sum();
            for (i, chunk) in chunks.iter().enumerate() {
                mux.stage(i, chunk).unwrap();
                mux.mark_finished(i).unwrap();
            }
            mux.run_to_completion().unwrap();
            proptest::prop_assert_eq!(mux.into_inner().len(), total);
        }

        /// Simple layout never reorders or interleaves items: the sink ends up
        /// as the plain concatenation of every item's staged bytes, in index
        /// order, regardless of how large each item is.
        #[test]
        fn simple_scheme_is_plain_concatenation(
            chunks in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 0..200), 1..6),
        ) {
            let sink = Vec::new();
            let mut mux = PayloadMultiplexer::new(sink, LayoutScheme::Simple, entropy(), chunks.len()).unwrap();
            for (i, chunk) in chunks.iter().enumerate() {
                mux.stage(i, chunk).unwrap();
                mux.mark_finished(i).unwrap();
            }
            mux.run_to_completion().unwrap();
            let expected: Vec<u8> = chunks.into_iter().flatten().collect();
            proptest::prop_assert_eq!(mux.into_inner(), expected);
        }

        /// For any item sizes and any Fabric stripe range, demultiplexing a
        /// multiplexed stream with the same seed recovers every item
        /// byte-for-byte (SPEC_FULL §8: `demux(mux(items, seed)) == items`).
        #[test]
        fn fabric_demux_inverts_mux(
            chunks in proptest::collection::vec(proptest::collection::vec(proptest::prelude::any::<u8>(), 1..150), 1..5),
            min_stripe in 8u32..50,
            pad in 0u32..200,
        ) {
            let max_stripe = min_stripe + pad;
            let scheme = LayoutScheme::Fabric { min_stripe, max_stripe };
            let sink = Vec::new();
            let mut mux = PayloadMultiplexer::new(sink, scheme, entropy_with(42, 7), chunks.len()).unwrap();
            for (i, chunk) in chunks.iter().enumerate() {
                mux.stage(i, chunk).unwrap();
                mux.mark_finished(i).unwrap();
            }
            mux.run_to_completion().unwrap();
            let payload = mux.into_inner();

            let lengths: Vec<u64> = chunks.iter().map(|c| c.len() as u64).collect();
            let mut demux =
                PayloadDemultiplexer::new(payload.as_slice(), scheme, entropy_with(42, 7), &lengths).unwrap();
            demux.run_to_completion().unwrap();
            proptest::prop_assert_eq!(demux.into_items(), chunks);
        }
    }
}
