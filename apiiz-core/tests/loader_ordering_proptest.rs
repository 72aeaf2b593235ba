// Property tests for positional batching: however many keys join a window,
// each caller receives the result at its own position.

use apiiz_core::{loader, memory, Context, LoaderOptions, Resolver};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn squares(batches: Arc<AtomicUsize>) -> Resolver<Vec<i64>, Vec<i64>> {
    memory(move |keys: Vec<i64>, _ctx| {
        batches.fetch_add(1, Ordering::SeqCst);
        async move { Ok(keys.into_iter().map(|k| k * k).collect()) }
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_positional_results_follow_call_order(keys in prop::collection::vec(-1000i64..1000, 1..64)) {
        let batches = Arc::new(AtomicUsize::new(0));
        let dispatcher = loader(squares(batches.clone()), LoaderOptions::new())
            .resolve(&Context::default());

        let results = runtime().block_on(async {
            let calls: Vec<_> = keys.iter().map(|k| dispatcher.call(*k)).collect();
            futures::future::try_join_all(calls).await
        });

        let expected: Vec<i64> = keys.iter().map(|k| k * k).collect();
        prop_assert_eq!(results.unwrap(), expected);
        prop_assert_eq!(batches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prop_max_batch_size_splits_windows(
        keys in prop::collection::vec(0i64..100, 1..40),
        max in 1usize..8,
    ) {
        let batches = Arc::new(AtomicUsize::new(0));
        let dispatcher = loader(squares(batches.clone()), LoaderOptions::new().max_batch_size(max))
            .resolve(&Context::default());

        let results = runtime().block_on(async {
            let calls: Vec<_> = keys.iter().map(|k| dispatcher.call(*k)).collect();
            futures::future::try_join_all(calls).await
        });

        let expected: Vec<i64> = keys.iter().map(|k| k * k).collect();
        prop_assert_eq!(results.unwrap(), expected);
        prop_assert_eq!(batches.load(Ordering::SeqCst), keys.len().div_ceil(max));
    }
}
