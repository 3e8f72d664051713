//! Follows span links across traces.
//!
//! Starting from one trace, every trace referenced through a span link (or a
//! backend-populated forward link) is fetched breadth-first, each at most once,
//! until [`MAX_LINKED_TRACES`] traces, the root included, have been fetched.

use crate::error::EngineError;
use crate::records::{flatten_resource_spans, FlatSpan};
use crate::source::{TimeRange, TraceFetcher};
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use std::collections::{HashSet, VecDeque};

/// Upper bound on traces fetched while following links, counting the root.
pub const MAX_LINKED_TRACES: usize = 20;

/// The spans of one fetched trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceGroup {
    pub trace_id: String,
    pub spans: Vec<FlatSpan>,
    /// The envelopes as fetched, for OTLP/JSON output.
    pub resource_spans: Vec<ResourceSpans>,
}

/// Returns linked trace IDs not yet in `seen`, in encounter order.
///
/// Every returned ID is added to `seen`, so an ID referenced several times in
/// the batch is returned once.
pub fn extract_linked_trace_ids(spans: &[FlatSpan], seen: &mut HashSet<String>) -> Vec<String> {
    let mut discovered = Vec::new();
    for span in spans {
        for link in span.links.iter().chain(span.forward_links.iter()) {
            if link.trace_id.is_empty() {
                continue;
            }
            if seen.insert(link.trace_id.clone()) {
                discovered.push(link.trace_id.clone());
            }
        }
    }
    discovered
}

/// Fetches one trace and flattens its spans.
pub fn fetch_trace_group<F>(
    fetcher: &mut F,
    trace_id: &str,
    time_range: &TimeRange,
) -> anyhow::Result<TraceGroup>
where
    F: TraceFetcher + ?Sized,
{
    let resource_spans = fetcher.fetch_trace(trace_id, time_range)?;
    Ok(TraceGroup {
        trace_id: trace_id.to_string(),
        spans: flatten_resource_spans(&resource_spans),
        resource_spans,
    })
}

/// Expands `root` breadth-first through linked traces.
///
/// The result starts with `root`, followed by linked traces in discovery order.
pub fn follow_links<F>(
    root: TraceGroup,
    time_range: &TimeRange,
    fetcher: &mut F,
) -> Result<Vec<TraceGroup>, EngineError>
where
    F: TraceFetcher + ?Sized,
{
    let mut seen: HashSet<String> = HashSet::from([root.trace_id.clone()]);
    let mut queue: VecDeque<String> = extract_linked_trace_ids(&root.spans, &mut seen).into();
    let mut groups = vec![root];

    while let Some(trace_id) = queue.pop_front() {
        if groups.len() >= MAX_LINKED_TRACES {
            tracing::warn!(
                limit = MAX_LINKED_TRACES,
                skipped = queue.len() + 1,
                "Linked trace limit reached, not following remaining links"
            );
            break;
        }
        tracing::debug!(trace_id = %trace_id, "Fetching linked trace");
        let group = fetch_trace_group(fetcher, &trace_id, time_range).map_err(|source| {
            EngineError::Fetch {
                trace_id: trace_id.clone(),
                source,
            }
        })?;
        queue.extend(extract_linked_trace_ids(&group.spans, &mut seen));
        groups.push(group);
    }

    tracing::debug!(traces = groups.len(), "Finished following links");
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::test_support::flat_span;
    use crate::records::SpanLinkRef;
    use anyhow::anyhow;
    use opentelemetry_proto::tonic::trace::v1::{span::Link, ScopeSpans, Span};
    use std::collections::HashMap;

    fn link(trace_id: &str) -> SpanLinkRef {
        SpanLinkRef {
            trace_id: trace_id.to_string(),
            span_id: "00".to_string(),
        }
    }

    fn decode_hex(id: &str) -> Vec<u8> {
        hex::decode(id).unwrap()
    }

    // In-memory fetcher: trace id -> list of (span id, linked trace ids).
    #[derive(Default)]
    struct FakeFetcher {
        traces: HashMap<String, Vec<(String, Vec<String>)>>,
        calls: Vec<String>,
        fail_on: Option<String>,
    }

    impl FakeFetcher {
        fn with_trace(mut self, trace_id: &str, spans: &[(&str, &[&str])]) -> Self {
            self.traces.insert(
                trace_id.to_string(),
                spans
                    .iter()
                    .map(|(id, links)| {
                        (id.to_string(), links.iter().map(|l| l.to_string()).collect())
                    })
                    .collect(),
            );
            self
        }
    }

    impl TraceFetcher for FakeFetcher {
        fn fetch_trace(
            &mut self,
            trace_id: &str,
            _time_range: &TimeRange,
        ) -> anyhow::Result<Vec<ResourceSpans>> {
            self.calls.push(trace_id.to_string());
            if self.fail_on.as_deref() == Some(trace_id) {
                return Err(anyhow!("backend unavailable"));
            }
            let spans = self
                .traces
                .get(trace_id)
                .map(|spans| {
                    spans
                        .iter()
                        .map(|(span_id, links)| Span {
                            trace_id: decode_hex(trace_id),
                            span_id: decode_hex(span_id),
                            links: links
                                .iter()
                                .map(|l| Link {
                                    trace_id: decode_hex(l),
                                    span_id: decode_hex("01"),
                                    ..Default::default()
                                })
                                .collect(),
                            ..Default::default()
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            }])
        }
    }

    fn root_group(trace_id: &str, links: &[&str]) -> TraceGroup {
        let mut span = flat_span(trace_id, "aa", "");
        span.links = links.iter().map(|l| link(l)).collect();
        TraceGroup {
            trace_id: trace_id.to_string(),
            spans: vec![span],
            resource_spans: Vec::new(),
        }
    }

    #[test]
    fn test_extract_skips_seen_and_dedups() {
        let mut a = flat_span("t0", "s1", "");
        a.links = vec![link("t1"), link("t0"), link("t2")];
        let mut b = flat_span("t0", "s2", "");
        b.links = vec![link("t1")];
        b.forward_links = vec![link("t3"), link("")];

        let mut seen = HashSet::from(["t0".to_string()]);
        let ids = extract_linked_trace_ids(&[a, b], &mut seen);
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
        for id in ["t0", "t1", "t2", "t3"] {
            assert!(seen.contains(id));
        }
    }

    #[test]
    fn test_extract_returns_nothing_already_seen() {
        let mut span = flat_span("t0", "s1", "");
        span.links = vec![link("t1")];
        let mut seen = HashSet::from(["t1".to_string()]);
        assert!(extract_linked_trace_ids(&[span], &mut seen).is_empty());
    }

    #[test]
    fn test_follow_fetches_each_linked_trace_once() {
        let mut fetcher = FakeFetcher::default()
            .with_trace("b1", &[("b101", &["a0"]), ("b102", &["c2"])])
            .with_trace("c2", &[("c201", &["b1", "a0"])]);

        // Two spans both link to b1 and c2.
        let mut root = root_group("a0", &["b1", "c2"]);
        let mut second = flat_span("a0", "ab", "aa");
        second.links = vec![link("c2"), link("b1")];
        root.spans.push(second);

        let groups = follow_links(root, &TimeRange::default(), &mut fetcher).unwrap();
        let ids: Vec<&str> = groups.iter().map(|g| g.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "b1", "c2"]);
        assert_eq!(fetcher.calls, vec!["b1", "c2"]);
        assert_eq!(groups[1].spans.len(), 2);
    }

    #[test]
    fn test_follow_is_breadth_first() {
        let mut fetcher = FakeFetcher::default()
            .with_trace("b1", &[("b101", &["d4"])])
            .with_trace("c2", &[("c201", &[])])
            .with_trace("d4", &[("d401", &[])]);
        let groups =
            follow_links(root_group("a0", &["b1", "c2"]), &TimeRange::default(), &mut fetcher)
                .unwrap();
        let ids: Vec<&str> = groups.iter().map(|g| g.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "b1", "c2", "d4"]);
    }

    #[test]
    fn test_follow_stops_at_limit() {
        // A chain of 30 traces, each linking to the next.
        let ids: Vec<String> = (1..=30).map(|i| format!("{:02x}", i)).collect();
        let mut fetcher = FakeFetcher::default();
        for (i, id) in ids.iter().enumerate() {
            let next: Vec<&str> = ids.get(i + 1).map(|n| vec![n.as_str()]).unwrap_or_default();
            fetcher = fetcher.with_trace(id, &[("ee", &next)]);
        }
        let groups =
            follow_links(root_group("00", &["01"]), &TimeRange::default(), &mut fetcher).unwrap();
        // The root counts toward the cap.
        assert_eq!(groups.len(), MAX_LINKED_TRACES);
        assert_eq!(fetcher.calls.len(), MAX_LINKED_TRACES - 1);
        assert_eq!(groups.last().map(|g| g.trace_id.as_str()), Some("13"));
    }

    #[test]
    fn test_follow_without_links_fetches_nothing() {
        let mut fetcher = FakeFetcher::default();
        let groups =
            follow_links(root_group("a0", &[]), &TimeRange::default(), &mut fetcher).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(fetcher.calls.is_empty());
    }

    #[test]
    fn test_follow_wraps_fetch_error_with_trace_id() {
        let mut fetcher = FakeFetcher {
            fail_on: Some("b1".to_string()),
            ..Default::default()
        };
        let err = follow_links(root_group("a0", &["b1"]), &TimeRange::default(), &mut fetcher)
            .unwrap_err();
        match err {
            EngineError::Fetch { trace_id, .. } => assert_eq!(trace_id, "b1"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
