//! Streaming dataset decoding
//!
//! Datasets are a single top-level JSON array that can run to hundreds of
//! megabytes. [`decode_batches`] walks that array one element at a time through a
//! serde [`Visitor`], so only the batch being built is ever held in memory, and
//! hands each full batch to a caller-supplied sink.
//!
//! The sink decides whether decoding continues. The pipeline's sink blocks on a
//! bounded channel, which is how queue backpressure reaches the decoder.

use serde::de::{self, DeserializeOwned, SeqAccess, Visitor};
use serde::Deserializer as _;
use std::fmt;
use std::io::Read;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use tracing::debug;

use crate::catalog::Game;
use crate::error::{Result, SyncError};
use crate::provider::{PokemonTcgCard, ScryfallCard, SourceCard};

const PROGRESS_EVERY: usize = 1000;

/// An ordered slice of the dataset
#[derive(Debug, Clone)]
pub struct Batch {
    /// 0-based position of this batch in the dataset
    pub sequence: usize,
    /// Dataset index of `cards[0]`
    pub start_index: usize,
    pub cards: Vec<SourceCard>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Groups records into batches of at most `batch_size`
#[derive(Debug)]
pub struct BatchBuilder {
    batch_size: usize,
    current: Vec<SourceCard>,
    next_sequence: usize,
    next_index: usize,
}

impl BatchBuilder {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            current: Vec::with_capacity(batch_size),
            next_sequence: 0,
            next_index: 0,
        }
    }

    /// Add a record; returns the batch it completed, if any
    pub fn push(&mut self, card: SourceCard) -> Option<Batch> {
        self.current.push(card);
        if self.current.len() >= self.batch_size {
            self.flush()
        } else {
            None
        }
    }

    /// The trailing partial batch, if any records are pending
    pub fn finish(mut self) -> Option<Batch> {
        self.flush()
    }

    fn flush(&mut self) -> Option<Batch> {
        if self.current.is_empty() {
            return None;
        }
        let cards = std::mem::replace(&mut self.current, Vec::with_capacity(self.batch_size));
        let batch = Batch {
            sequence: self.next_sequence,
            start_index: self.next_index,
            cards,
        };
        self.next_sequence += 1;
        self.next_index += batch.len();
        Some(batch)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub records: usize,
    pub batches: usize,
    /// The sink asked to stop before the end of the array
    pub stopped_early: bool,
}

/// Decode a JSON array of `game` records from `reader`, emitting batches
///
/// A structurally malformed document (truncated input, wrong element types,
/// trailing garbage) is a [`SyncError::Decode`]. Missing or empty fields are not:
/// records decode leniently and are validated later.
pub fn decode_batches<R, F>(reader: R, game: Game, batch_size: usize, sink: F) -> Result<DecodeSummary>
where
    R: Read,
    F: FnMut(Batch) -> ControlFlow<()>,
{
    match game {
        Game::Mtg => decode_as::<ScryfallCard, _, _>(reader, batch_size, sink, SourceCard::Mtg),
        Game::Pokemon => {
            decode_as::<PokemonTcgCard, _, _>(reader, batch_size, sink, SourceCard::Pokemon)
        },
    }
}

fn decode_as<T, R, F>(
    reader: R,
    batch_size: usize,
    mut sink: F,
    wrap: fn(T) -> SourceCard,
) -> Result<DecodeSummary>
where
    T: DeserializeOwned,
    R: Read,
    F: FnMut(Batch) -> ControlFlow<()>,
{
    let mut summary = DecodeSummary::default();
    let mut builder = BatchBuilder::new(batch_size);

    let mut de = serde_json::Deserializer::from_reader(reader);
    let visitor = ArrayVisitor::<T, F> {
        builder: &mut builder,
        sink: &mut sink,
        wrap,
        summary: &mut summary,
        _element: PhantomData,
    };

    let decoded = de.deserialize_seq(visitor).and_then(|()| de.end());
    if let Err(e) = decoded {
        // A sink stop surfaces as a custom serde error; it is not a decode failure
        if summary.stopped_early {
            return Ok(summary);
        }
        return Err(SyncError::Decode {
            records: summary.records,
            message: e.to_string(),
        });
    }

    if let Some(batch) = builder.finish() {
        summary.batches += 1;
        if sink(batch).is_break() {
            summary.stopped_early = true;
        }
    }

    debug!(records = summary.records, batches = summary.batches, "Dataset decoded");
    Ok(summary)
}

struct ArrayVisitor<'a, T, F> {
    builder: &'a mut BatchBuilder,
    sink: &'a mut F,
    wrap: fn(T) -> SourceCard,
    summary: &'a mut DecodeSummary,
    _element: PhantomData<T>,
}

impl<'de, 'a, T, F> Visitor<'de> for ArrayVisitor<'a, T, F>
where
    T: DeserializeOwned,
    F: FnMut(Batch) -> ControlFlow<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON array of card objects")
    }

    fn visit_seq<A>(self, mut seq: A) -> std::result::Result<(), A::Error>
    where
        A: SeqAccess<'de>,
    {
        while let Some(element) = seq.next_element::<T>()? {
            self.summary.records += 1;
            if self.summary.records % PROGRESS_EVERY == 0 {
                debug!(records = self.summary.records, "Decoding dataset");
            }

            if let Some(batch) = self.builder.push((self.wrap)(element)) {
                self.summary.batches += 1;
                if (self.sink)(batch).is_break() {
                    self.summary.stopped_early = true;
                    return Err(de::Error::custom("decoding stopped by consumer"));
                }
            }
        }
        Ok(())
    }
}
