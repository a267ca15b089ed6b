//! The seam to the job store's client library.
//!
//! Production deployments implement [`JobSource`] over the real client;
//! the [`memory`] module provides an in-memory store that honors the same
//! contract, including evaluation of the token query language, so the
//! connector is testable end to end.

use defectsync_core::ConnectParams;
use defectsync_types::TrackResult;
use std::collections::BTreeMap;

/// Form-level access to a job store.
pub trait JobSource {
    /// Builds an unconnected source from the connect parameters. The
    /// connector calls [`connect`](Self::connect) afterwards.
    fn open(params: &ConnectParams) -> TrackResult<Self>
    where
        Self: Sized;

    /// Whether the connection currently answers.
    fn is_alive(&mut self) -> bool;

    /// (Re)establishes the connection.
    fn connect(&mut self) -> TrackResult<()>;

    /// Version string of the store.
    fn server_info(&mut self) -> TrackResult<String>;

    /// The store's clock, formatted `%Y/%m/%d %H:%M:%S`.
    fn server_date(&mut self) -> TrackResult<String>;

    /// The job specification form text.
    fn job_spec(&mut self) -> TrackResult<String>;

    /// Ids of jobs matching a token query, oldest first, capped at
    /// `max_rows` when given.
    fn run_query(&mut self, query: &str, max_rows: Option<u32>) -> TrackResult<Vec<String>>;

    /// One job's fields.
    fn fetch_job(&mut self, id: &str) -> TrackResult<BTreeMap<String, String>>;

    /// Writes a job form. `new` ids get a store-assigned name, which is
    /// returned either way. System-maintained fields are stamped by the
    /// store.
    fn save_job(
        &mut self,
        id: &str,
        fields: &BTreeMap<String, String>,
    ) -> TrackResult<String>;
}

pub mod memory {
    use super::JobSource;
    use defectsync_types::{NEW_RECORD_ID, TrackError, TrackResult};
    use std::collections::BTreeMap;

    const DEFAULT_SPEC: &str = "\
# A job specification.
Fields:
\t101 Job word 32 required
\t102 Status select 10 required
\t103 User word 32 always
\t104 Date date 20 always
\t105 Description text 0 required

Values:
\tStatus open/suspended/closed

Presets:
\tStatus open
\tUser $user
\tDate $now
";

    /// In-memory job store with a controllable clock and failure switch.
    pub struct InMemoryJobStore {
        pub jobs: BTreeMap<String, BTreeMap<String, String>>,
        /// Value stamped into `Date`/`User` stamps and reported as the
        /// store clock; fixed so tests are deterministic.
        pub clock: String,
        /// The user stamped into `always` word fields on save.
        pub acting_user: String,
        pub spec_text: String,
        alive: bool,
        /// When set, `connect` fails until cleared.
        pub refuse_connects: bool,
        pub connects: u32,
        pub saves: u32,
        next_id: u32,
    }

    impl Default for InMemoryJobStore {
        fn default() -> Self {
            Self {
                jobs: BTreeMap::new(),
                clock: "2024/03/05 12:00:00".into(),
                acting_user: "replicator".into(),
                spec_text: DEFAULT_SPEC.into(),
                alive: false,
                refuse_connects: false,
                connects: 0,
                saves: 0,
                next_id: 1,
            }
        }
    }

    impl InMemoryJobStore {
        /// Seeds a job, returning its id.
        pub fn seed_job(&mut self, id: &str, fields: &[(&str, &str)]) -> String {
            let mut map: BTreeMap<String, String> = fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            map.insert("Job".into(), id.to_string());
            self.jobs.insert(id.to_string(), map);
            id.to_string()
        }

        /// Drops the connection, as if the store went away.
        pub fn kill_connection(&mut self) {
            self.alive = false;
        }

        fn ensure_alive(&self) -> TrackResult<()> {
            if self.alive {
                Ok(())
            } else {
                Err(TrackError::severed("job store connection is down"))
            }
        }
    }

    impl JobSource for InMemoryJobStore {
        fn open(params: &defectsync_core::ConnectParams) -> TrackResult<Self> {
            let mut store = Self::default();
            if !params.user.is_empty() {
                store.acting_user = params.user.clone();
            }
            Ok(store)
        }

        fn is_alive(&mut self) -> bool {
            self.alive
        }

        fn connect(&mut self) -> TrackResult<()> {
            if self.refuse_connects {
                return Err(TrackError::severed("job store refused the connection"));
            }
            self.alive = true;
            self.connects += 1;
            Ok(())
        }

        fn server_info(&mut self) -> TrackResult<String> {
            self.ensure_alive()?;
            Ok("JobStore/TEST/2024.1".into())
        }

        fn server_date(&mut self) -> TrackResult<String> {
            self.ensure_alive()?;
            Ok(self.clock.clone())
        }

        fn job_spec(&mut self) -> TrackResult<String> {
            self.ensure_alive()?;
            Ok(self.spec_text.clone())
        }

        fn run_query(&mut self, query: &str, max_rows: Option<u32>) -> TrackResult<Vec<String>> {
            self.ensure_alive()?;
            let terms = parse_query(query)?;
            let mut ids: Vec<String> = self
                .jobs
                .iter()
                .filter(|(_, fields)| terms.iter().all(|t| t.matches(fields)))
                .map(|(id, _)| id.clone())
                .collect();
            if let Some(max) = max_rows {
                ids.truncate(max as usize);
            }
            Ok(ids)
        }

        fn fetch_job(&mut self, id: &str) -> TrackResult<BTreeMap<String, String>> {
            self.ensure_alive()?;
            self.jobs
                .get(id)
                .cloned()
                .ok_or_else(|| TrackError::Data(format!("no such job: {id}")))
        }

        fn save_job(
            &mut self,
            id: &str,
            fields: &BTreeMap<String, String>,
        ) -> TrackResult<String> {
            self.ensure_alive()?;
            self.saves += 1;
            let id = if id == NEW_RECORD_ID {
                let assigned = format!("job{:06}", self.next_id);
                self.next_id += 1;
                self.jobs.insert(assigned.clone(), BTreeMap::new());
                assigned
            } else if self.jobs.contains_key(id) {
                id.to_string()
            } else {
                return Err(TrackError::Data(format!("no such job: {id}")));
            };

            let clock = self.clock.clone();
            let user = self.acting_user.clone();
            let job = self.jobs.entry(id.clone()).or_default();
            for (name, value) in fields {
                job.insert(name.clone(), value.clone());
            }
            job.insert("Job".into(), id.clone());
            // The store stamps its system-maintained fields on every save.
            job.insert("Date".into(), clock);
            job.insert("User".into(), user);
            Ok(id)
        }
    }

    /// One top-level AND term: alternatives OR'd within.
    struct Term {
        alternatives: Vec<Comparison>,
    }

    enum Comparison {
        Eq(String, String),
        Ne(String, String),
        Ge(String, String),
    }

    impl Term {
        fn matches(&self, fields: &BTreeMap<String, String>) -> bool {
            self.alternatives.iter().any(|c| c.matches(fields))
        }
    }

    impl Comparison {
        fn matches(&self, fields: &BTreeMap<String, String>) -> bool {
            let (name, want) = match self {
                Self::Eq(n, w) | Self::Ne(n, w) | Self::Ge(n, w) => (n, w),
            };
            let Some(have) = fields.get(name) else {
                return matches!(self, Self::Ne(..));
            };
            match self {
                // Dates are written `2024/03/05:12:00:00` in queries but
                // stored with a space; normalize before comparing.
                Self::Ge(..) => normalize_date(have) >= normalize_date(want),
                Self::Eq(..) => have == want,
                Self::Ne(..) => have != want,
            }
        }
    }

    fn normalize_date(s: &str) -> String {
        s.replace(' ', ":")
    }

    /// Splits a query into AND terms: parenthesized groups of `|`-joined
    /// comparisons, or single bare comparisons. Backslash escapes are
    /// honored inside values.
    fn parse_query(query: &str) -> TrackResult<Vec<Term>> {
        let mut terms = Vec::new();
        let mut rest = query.trim();
        while !rest.is_empty() {
            if let Some(inner) = rest.strip_prefix('(') {
                let end = find_group_end(inner)?;
                let group = &inner[..end];
                terms.push(Term {
                    alternatives: split_alternatives(group)
                        .into_iter()
                        .map(|alt| parse_comparison(&alt))
                        .collect::<TrackResult<_>>()?,
                });
                rest = inner[end + 1..].trim_start();
            } else {
                let end = rest.find(' ').unwrap_or(rest.len());
                terms.push(Term {
                    alternatives: vec![parse_comparison(&rest[..end])?],
                });
                rest = rest[end..].trim_start();
            }
        }
        Ok(terms)
    }

    fn find_group_end(s: &str) -> TrackResult<usize> {
        let mut escaped = false;
        for (i, ch) in s.char_indices() {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                ')' => return Ok(i),
                _ => {}
            }
        }
        Err(TrackError::Query("unterminated group in job query".into()))
    }

    fn split_alternatives(group: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut escaped = false;
        for ch in group.chars() {
            match ch {
                _ if escaped => {
                    current.push('\\');
                    current.push(ch);
                    escaped = false;
                }
                '\\' => escaped = true,
                '|' => parts.push(std::mem::take(&mut current)),
                _ => current.push(ch),
            }
        }
        parts.push(current);
        parts
    }

    /// Splits `name OP value` on the first unescaped operator, so values
    /// containing escaped metacharacters compare literally.
    fn parse_comparison(token: &str) -> TrackResult<Comparison> {
        let ops = [
            (">=", Comparison::Ge as fn(String, String) -> Comparison),
            ("!=", Comparison::Ne),
            ("=", Comparison::Eq),
        ];
        let mut escaped = false;
        for (i, ch) in token.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            if ch == '\\' {
                escaped = true;
                continue;
            }
            for (op, build) in ops {
                if token[i..].starts_with(op) {
                    let name = unescape(&token[..i]);
                    let value = unescape(&token[i + op.len()..]);
                    return Ok(build(name, value));
                }
            }
        }
        Err(TrackError::Query(format!(
            "unparseable job query term: {token}"
        )))
    }

    fn unescape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut escaped = false;
        for ch in s.chars() {
            match ch {
                _ if escaped => {
                    out.push(ch);
                    escaped = false;
                }
                '\\' => escaped = true,
                _ => out.push(ch),
            }
        }
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn store_with_jobs() -> InMemoryJobStore {
            let mut store = InMemoryJobStore::default();
            store.connect().unwrap();
            store.seed_job(
                "job000001",
                &[("Status", "open"), ("User", "alice"), ("Date", "2024/03/01 09:00:00")],
            );
            store.seed_job(
                "job000002",
                &[("Status", "closed"), ("User", "bob"), ("Date", "2024/03/02 10:00:00")],
            );
            store
        }

        #[test]
        fn query_and_of_or_groups() {
            let mut store = store_with_jobs();
            let ids = store
                .run_query("(Status=open|Status=suspended)", None)
                .unwrap();
            assert_eq!(ids, ["job000001"]);

            let ids = store
                .run_query("Date>=2024/03/02:00:00:00 (Status=open|Status=closed)", None)
                .unwrap();
            assert_eq!(ids, ["job000002"]);
        }

        #[test]
        fn query_not_equal_excludes() {
            let mut store = store_with_jobs();
            let ids = store.run_query("User!=alice", None).unwrap();
            assert_eq!(ids, ["job000002"]);
        }

        #[test]
        fn escaped_values_compare_literally() {
            let mut store = store_with_jobs();
            store.seed_job("job000003", &[("Status", "on hold")]);
            let ids = store.run_query(r"(Status=on\ hold)", None).unwrap();
            assert_eq!(ids, ["job000003"]);
        }

        #[test]
        fn unterminated_group_is_rejected() {
            let mut store = store_with_jobs();
            assert!(store.run_query("(Status=open", None).is_err());
        }
    }
}
