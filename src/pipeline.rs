use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::info;

use crate::aggregate::Aggregator;
use crate::db::{self, ReconcileStats};
use crate::sources::SourceAdapter;

/// Counts reported after one source run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub source: String,
    pub fragments: usize,
    pub facilities: usize,
    pub doctors: usize,
    pub written: ReconcileStats,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "[{}] Scraped {} records → {} facilities, {} doctors.",
            self.source, self.fragments, self.facilities, self.doctors
        );
        println!(
            "[{}] Upserted {} facilities, replaced {} doctors with {}.",
            self.source,
            self.written.facilities,
            self.written.doctors_removed,
            self.written.doctors_inserted
        );
    }
}

/// Pull every fragment from `adapter`, group them, then reconcile the
/// groups against the store in one transaction.
///
/// A fetch error aborts before anything is written.
pub async fn run_source<A>(conn: &Connection, adapter: &mut A) -> Result<RunSummary>
where
    A: SourceAdapter + ?Sized,
{
    let source = adapter.source().to_string();
    info!("[{}] Scraping...", source);

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut aggregator = Aggregator::new();
    let mut fragments = 0usize;
    while let Some(fragment) = adapter.next_fragment().await? {
        aggregator.push(fragment);
        fragments += 1;
        pb.set_message(format!("{}: {} records", source, fragments));
    }
    pb.finish_and_clear();

    let facilities = aggregator.facility_count();
    let doctors = aggregator.doctor_count();
    info!(
        "[{}] Scraped {} records, grouped into {} facilities with {} doctors",
        source, fragments, facilities, doctors
    );

    let written = db::reconcile(conn, &aggregator.into_groups())?;
    info!(
        "[{}] Persisted {} facilities, {} doctors",
        source, written.facilities, written.doctors_inserted
    );

    Ok(RunSummary {
        source,
        fragments,
        facilities,
        doctors,
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::{doctor, facility};
    use crate::db::tests::memory_db;
    use crate::model::Fragment;
    use crate::sources::kvwl::tests::{page, FakeApi};
    use crate::sources::kvwl::{self, KvwlAdapter};
    use crate::sources::FetchError;
    use async_trait::async_trait;

    /// Replays a fixed list of fragments, optionally failing at the end.
    struct ReplayAdapter {
        fragments: std::vec::IntoIter<Fragment>,
        fail_at_end: bool,
    }

    impl ReplayAdapter {
        fn new(fragments: Vec<Fragment>) -> Self {
            ReplayAdapter {
                fragments: fragments.into_iter(),
                fail_at_end: false,
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for ReplayAdapter {
        fn source(&self) -> &str {
            "test"
        }

        async fn next_fragment(&mut self) -> Result<Option<Fragment>, FetchError> {
            match self.fragments.next() {
                Some(f) => Ok(Some(f)),
                None if self.fail_at_end => Err(FetchError::Timeout {
                    url: "fake://detail".into(),
                }),
                None => Ok(None),
            }
        }
    }

    fn frag(key: &str, doc: &str) -> Fragment {
        Fragment {
            facility: facility(key, "Praxis"),
            doctor: Some(doctor(doc, doc)),
        }
    }

    fn scrape() -> Vec<Fragment> {
        vec![frag("f1", "d1"), frag("f1", "d2"), frag("f2", "d3"), frag("f1", "d1")]
    }

    fn counts(conn: &Connection) -> (usize, usize) {
        let f = conn.query_row("SELECT COUNT(*) FROM facilities", [], |r| r.get(0)).unwrap();
        let d = conn.query_row("SELECT COUNT(*) FROM doctors", [], |r| r.get(0)).unwrap();
        (f, d)
    }

    #[tokio::test]
    async fn run_reports_counts() {
        let conn = memory_db();
        let summary = run_source(&conn, &mut ReplayAdapter::new(scrape())).await.unwrap();
        assert_eq!(summary.source, "test");
        assert_eq!(summary.fragments, 4);
        assert_eq!(summary.facilities, 2);
        assert_eq!(summary.doctors, 3);
        assert_eq!(summary.written.doctors_inserted, 3);
        assert_eq!(counts(&conn), (2, 3));
    }

    #[tokio::test]
    async fn identical_runs_converge() {
        let conn = memory_db();
        run_source(&conn, &mut ReplayAdapter::new(scrape())).await.unwrap();
        let once = counts(&conn);
        let again = run_source(&conn, &mut ReplayAdapter::new(scrape())).await.unwrap();
        assert_eq!(counts(&conn), once);
        assert_eq!(again.written.doctors_removed, 3);
    }

    #[tokio::test]
    async fn removed_doctor_disappears() {
        let conn = memory_db();
        run_source(&conn, &mut ReplayAdapter::new(scrape())).await.unwrap();
        run_source(&conn, &mut ReplayAdapter::new(vec![frag("f1", "d2"), frag("f2", "d3")]))
            .await
            .unwrap();

        let mut stmt = conn.prepare("SELECT source_key FROM doctors ORDER BY source_key").unwrap();
        let keys: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec!["d2", "d3"]);
    }

    fn kvwl_practice() -> KvwlAdapter<FakeApi> {
        let api = FakeApi::new(
            vec![page(&["101", "102"])],
            vec![
                kvwl::tests::detail("101", "Eva", "Klein", "Hochstraße 1"),
                kvwl::tests::detail("102", "Jan", "Groß", "Hochstraße 1"),
            ],
        );
        kvwl::tests::adapter(api, 20)
    }

    #[tokio::test]
    async fn shared_address_is_one_facility_across_runs() {
        let conn = memory_db();
        let first = run_source(&conn, &mut kvwl_practice()).await.unwrap();
        assert_eq!(first.source, kvwl::SOURCE);
        assert_eq!((first.facilities, first.doctors), (1, 2));

        run_source(&conn, &mut kvwl_practice()).await.unwrap();
        assert_eq!(counts(&conn), (1, 2));

        let (source, name, postal): (String, String, String) = conn
            .query_row(
                "SELECT source, facility_name, postal_code FROM facilities",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(source, "kvwl");
        assert_eq!(name, "Gemeinschaftspraxis Buer");
        assert_eq!(postal, "45894");

        let mut stmt = conn
            .prepare("SELECT source_key FROM doctors ORDER BY source_key")
            .unwrap();
        let keys: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec!["101", "102"]);
    }

    #[tokio::test]
    async fn fetch_error_writes_nothing() {
        let conn = memory_db();
        let mut adapter = ReplayAdapter {
            fragments: scrape().into_iter(),
            fail_at_end: true,
        };
        let err = run_source(&conn, &mut adapter).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert_eq!(counts(&conn), (0, 0));
    }
}
