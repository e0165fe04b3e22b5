use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;

use sombra_search::query::{
    AggregationType, Directionality, PreparedQueryCache, QueryResult, SearchQuery,
    SearchQueryBuilder,
};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn count_query(table: &str) -> QueryResult<Arc<SearchQuery>> {
    let mut q = SearchQueryBuilder::new();
    let step = q.add_step(table)?;
    q.add_aggregated_field(step, "id", AggregationType::Count)?;
    q.freeze()
}

fn authored_articles(checked: bool) -> QueryResult<Arc<SearchQuery>> {
    let mut q = SearchQueryBuilder::new();
    let person = q.add_step("person")?;
    let article = q.add_step("article")?;
    let posts = q.add_relation_step("posts", person, article)?;
    q.set_directionality(posts, Directionality::Destination)?;
    q.set_checked_directionality(posts, checked)?;
    q.add_field(article, "title")?;
    q.freeze()
}

#[test]
fn compiled_form_is_reused_for_equal_queries() -> QueryResult<()> {
    init_tracing();
    let cache: PreparedQueryCache<String> = PreparedQueryCache::new(8, 64);
    let compiles = AtomicUsize::new(0);
    let compile = |query: &SearchQuery| -> Result<String, Infallible> {
        compiles.fetch_add(1, Ordering::SeqCst);
        Ok(format!("plan:{:016x}", query.fingerprint()))
    };

    let first = cache
        .get_or_insert_with(&count_query("person")?, compile)
        .expect("infallible");
    let second = cache
        .get_or_insert_with(&count_query("person")?, compile)
        .expect("infallible");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(compiles.load(Ordering::SeqCst), 1);

    cache
        .get_or_insert_with(&count_query("article")?, compile)
        .expect("infallible");
    assert_eq!(compiles.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 2);
    assert_eq!(metrics.inserts, 2);
    Ok(())
}

#[test]
fn checked_directionality_gets_its_own_entry() -> QueryResult<()> {
    init_tracing();
    let cache: PreparedQueryCache<bool> = PreparedQueryCache::new(4, 16);
    let plan_for = |query: &SearchQuery| -> Result<bool, Infallible> {
        let (_, rel) = query.relation_steps().next().expect("relation step");
        Ok(rel.checked_directionality())
    };

    let unchecked = cache
        .get_or_insert_with(&authored_articles(false)?, plan_for)
        .expect("infallible");
    let checked = cache
        .get_or_insert_with(&authored_articles(true)?, plan_for)
        .expect("infallible");
    assert!(!*unchecked);
    assert!(*checked);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.metrics().hits, 0);
    assert_eq!(cache.get(&*authored_articles(true)?).map(|v| *v), Some(true));
    Ok(())
}

#[test]
fn compile_errors_are_not_cached() -> QueryResult<()> {
    init_tracing();
    let cache: PreparedQueryCache<u64> = PreparedQueryCache::new(2, 8);
    let query = count_query("person")?;
    let failed: Result<_, &str> = cache.get_or_insert_with(&query, |_| Err("backend offline"));
    assert_eq!(failed.unwrap_err(), "backend offline");
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn frozen_queries_are_shared_across_threads() -> QueryResult<()> {
    init_tracing();
    let cache = Arc::new(PreparedQueryCache::<u64>::new(4, 32));
    let query = count_query("person")?;
    cache.insert(Arc::clone(&query), Arc::new(query.fingerprint()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let query = Arc::clone(&query);
            thread::spawn(move || cache.get(&query).map(|v| *v))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().expect("reader thread"), Some(query.fingerprint()));
    }
    assert_eq!(cache.metrics().hits, 4);

    cache.clear();
    assert!(cache.get(&query).is_none());
    Ok(())
}
