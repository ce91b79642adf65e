use log::debug;

use crate::maybe_async::MaybeAsync;

/// True iff every matcher result is true.
///
/// All results are collected first; when any of them is pending they are awaited together, so
/// a condition with several asynchronous lookups waits for the slowest one, not for their sum.
pub fn and_combiner<'a>(results: Vec<MaybeAsync<'a, bool>>) -> MaybeAsync<'a, bool> {
    MaybeAsync::join_all(results).map(|results| {
        let matched_all = results.iter().all(|matched| *matched);
        debug!("[andCombiner] evaluates to {}", matched_all);
        matched_all
    })
}

/// The first decision among ordered condition results.
///
/// Results are pulled lazily, so conditions after a synchronous decision are never evaluated.
/// Once a pending result is seen, later conditions are evaluated up to the next synchronous
/// decision and everything collected is awaited before choosing, in order. Yields `None` when the
/// sequence is empty or every condition abstains.
pub fn if_else_if_combiner<'a, T, I>(results: I) -> MaybeAsync<'a, Option<T>>
where
    T: Send + 'a,
    I: IntoIterator<Item = MaybeAsync<'a, Option<T>>>,
{
    let mut pending = Vec::new();
    for result in results {
        match result {
            MaybeAsync::Ready(None) => continue,
            MaybeAsync::Ready(Some(decision)) if pending.is_empty() => {
                return MaybeAsync::Ready(Some(decision));
            }
            ready @ MaybeAsync::Ready(Some(_)) => {
                pending.push(ready);
                break;
            }
            MaybeAsync::Pending(future) => pending.push(MaybeAsync::Pending(future)),
        }
    }

    if pending.is_empty() {
        debug!("[ifElseIfCombiner] all predicates evaluated, no treatment found");
        return MaybeAsync::Ready(None);
    }

    MaybeAsync::join_all(pending).map(|decisions| decisions.into_iter().flatten().next())
}
