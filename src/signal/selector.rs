use crate::types::{PriceSignal, SignalSource, Territory};

/// Rank of a source in the selection order; lower wins. `None` never wins.
fn precedence(source: SignalSource) -> Option<u8> {
    match source {
        SignalSource::LiveBuyBox => Some(0),
        SignalSource::LiveLowestNew => Some(1),
        SignalSource::CachedLive => Some(2),
        SignalSource::StoredReference => Some(3),
        SignalSource::None => None,
    }
}

/// Pick the single best price signal for `market` from `candidates`.
///
/// Signals in another market's currency are ignored rather than converted.
/// Ties within a source keep the first candidate. Returns the `None` signal
/// when nothing usable is present.
pub fn select_signal<'a, I>(market: Territory, candidates: I) -> PriceSignal
where
    I: IntoIterator<Item = &'a PriceSignal>,
{
    let currency = market.currency();
    candidates
        .into_iter()
        .filter(|s| s.currency() == currency && s.value() > 0.0)
        .filter_map(|s| precedence(s.source()).map(|rank| (rank, s)))
        .min_by_key(|&(rank, _)| rank)
        .map(|(_, s)| s.clone())
        .unwrap_or_else(|| PriceSignal::none(currency))
}
