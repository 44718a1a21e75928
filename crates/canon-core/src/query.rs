//! Temporal list queries over snapshot rows.

use chrono::NaiveDate;

use crate::{Error, Result, dict::Segment};

// ─── Limit ───────────────────────────────────────────────────────────────────

/// A page size. Never zero, never above [`Limit::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(usize);

impl Limit {
  pub const DEFAULT: usize = 10;
  pub const MAX: usize = 50;

  /// A limit filled in by the application rather than the caller: `0` means
  /// "use the default".
  pub fn defaulted(n: usize) -> Self {
    match n {
      0 => Self(Self::DEFAULT),
      n => Self(n.min(Self::MAX)),
    }
  }

  /// A limit supplied by the caller. Non-positive values are rejected; large
  /// values are clamped.
  pub fn explicit(n: i64) -> Result<Self> {
    if n <= 0 {
      return Err(Error::validation(format!("limit must be positive, got {n}")));
    }
    let n = usize::try_from(n).unwrap_or(Self::MAX);
    Ok(Self(n.min(Self::MAX)))
  }

  /// Parse a caller-supplied limit.
  pub fn parse(raw: &str) -> Result<Self> {
    let n = raw
      .trim()
      .parse::<i64>()
      .map_err(|_| Error::validation(format!("limit must be a number, got {raw:?}")))?;
    Self::explicit(n)
  }

  pub fn get(&self) -> usize { self.0 }
}

impl Default for Limit {
  fn default() -> Self { Self(Self::DEFAULT) }
}

// ─── Status filter ───────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  strum::Display,
  strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Inactive,
}

impl StatusFilter {
  pub fn parse(raw: &str) -> Result<Self> {
    raw.trim().parse().map_err(|_| {
      Error::validation(format!("status must be all, active or inactive, got {raw:?}"))
    })
  }

  pub fn admits<S: Segment>(&self, row: &S, as_of: NaiveDate) -> bool {
    match self {
      Self::All => true,
      Self::Active => row.is_active_on(as_of),
      Self::Inactive => !row.is_active_on(as_of),
    }
  }
}

// ─── ListQuery ───────────────────────────────────────────────────────────────

/// Parameters shared by `list_dicts` and `list_values`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
  /// The day the status filter is evaluated against.
  pub as_of:   NaiveDate,
  /// Case-insensitive substring matched against code or text.
  pub keyword: Option<String>,
  pub status:  StatusFilter,
  pub limit:   Limit,
  pub offset:  usize,
}

impl ListQuery {
  pub fn new(as_of: NaiveDate) -> Self {
    Self {
      as_of,
      keyword: None,
      status: StatusFilter::default(),
      limit: Limit::default(),
      offset: 0,
    }
  }

  fn keyword(&self) -> Option<String> {
    self
      .keyword
      .as_deref()
      .map(str::trim)
      .filter(|k| !k.is_empty())
      .map(str::to_lowercase)
  }

  /// Filter and order snapshot rows without paging them.
  ///
  /// Rows are ordered by code ascending, then most recent window first. Tenant
  /// fallback is decided on this result, before [`ListQuery::page`].
  pub fn matching<S: Segment>(&self, rows: Vec<S>) -> Vec<S> {
    let keyword = self.keyword();
    let mut rows: Vec<S> = rows
      .into_iter()
      .filter(|row| {
        keyword.as_deref().is_none_or(|k| {
          row.code().to_lowercase().contains(k) || row.text().to_lowercase().contains(k)
        })
      })
      .filter(|row| self.status.admits(row, self.as_of))
      .collect();

    rows.sort_by(|a, b| {
      a.code()
        .cmp(b.code())
        .then_with(|| b.enabled_on().cmp(&a.enabled_on()))
    });
    rows
  }

  /// Apply offset and limit to rows already passed through
  /// [`ListQuery::matching`].
  pub fn page<S>(&self, rows: Vec<S>) -> Vec<S> {
    rows
      .into_iter()
      .skip(self.offset)
      .take(self.limit.get())
      .collect()
  }

  /// Filter, order and page snapshot rows.
  pub fn select<S: Segment>(&self, rows: Vec<S>) -> Vec<S> { self.page(self.matching(rows)) }
}

/// The single applicable window on `as_of`: the greatest `enabled_on` not
/// after `as_of` whose window is still open on that day.
pub fn applicable_on<S: Segment>(rows: &[S], as_of: NaiveDate) -> Option<&S> {
  rows
    .iter()
    .filter(|row| row.is_active_on(as_of))
    .max_by_key(|row| row.enabled_on())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    dict::{DictValueSegment, ValueKey},
    tenant::TenantId,
  };

  fn day(s: &str) -> NaiveDate { NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap() }

  fn row(code: &str, label: &str, from: &str, until: Option<&str>) -> DictValueSegment {
    let key = ValueKey { dict_code: "org_type".into(), code: code.into() };
    let mut s = DictValueSegment::open(TenantId::GLOBAL, &key, label.into(), day(from));
    if let Some(until) = until {
      s.close(day(until));
    }
    s
  }

  #[test]
  fn explicit_limits() {
    assert_eq!(Limit::explicit(999).unwrap().get(), 50);
    assert_eq!(Limit::explicit(7).unwrap().get(), 7);
    assert!(matches!(Limit::explicit(0), Err(Error::Validation(_))));
    assert!(matches!(Limit::explicit(-3), Err(Error::Validation(_))));
    assert!(matches!(Limit::parse("ten"), Err(Error::Validation(_))));
    assert_eq!(Limit::parse(" 12 ").unwrap().get(), 12);
  }

  #[test]
  fn defaulted_limits() {
    assert_eq!(Limit::defaulted(0).get(), 10);
    assert_eq!(Limit::defaulted(80).get(), 50);
    assert_eq!(Limit::default().get(), 10);
  }

  #[test]
  fn status_parse_rejects_unknown() {
    assert_eq!(StatusFilter::parse("ACTIVE").unwrap(), StatusFilter::Active);
    assert!(matches!(StatusFilter::parse("gone"), Err(Error::Validation(_))));
  }

  #[test]
  fn select_orders_code_then_recent_first() {
    let rows = vec![
      row("20", "Team", "2024-01-01", None),
      row("10", "Dept", "2024-01-01", Some("2024-06-01")),
      row("10", "Department", "2024-06-01", None),
    ];
    let picked = ListQuery::new(day("2024-07-01")).select(rows);
    let order: Vec<_> = picked.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(order, ["Department", "Dept", "Team"]);
  }

  #[test]
  fn select_filters_keyword_and_status() {
    let rows = vec![
      row("10", "Dept", "2024-01-01", Some("2024-06-01")),
      row("10", "Department", "2024-06-01", None),
      row("20", "Team", "2024-01-01", None),
    ];
    let mut q = ListQuery::new(day("2024-03-01"));
    q.keyword = Some("DEP".into());
    q.status = StatusFilter::Active;
    let picked = q.select(rows.clone());
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].label, "Dept");

    q.status = StatusFilter::Inactive;
    let picked = q.select(rows);
    assert_eq!(picked.len(), 1);
    assert_eq!(picked[0].label, "Department");
  }

  #[test]
  fn select_pages() {
    let rows: Vec<_> = (0..70)
      .map(|i| row(&format!("{i:03}"), "x", "2024-01-01", None))
      .collect();
    let mut q = ListQuery::new(day("2024-01-02"));
    q.limit = Limit::explicit(999).unwrap();
    assert_eq!(q.select(rows.clone()).len(), 50);
    q.offset = 60;
    assert_eq!(q.select(rows).len(), 10);
  }

  #[test]
  fn paging_happens_after_matching() {
    let rows = vec![
      row("10", "Dept", "2024-01-01", None),
      row("20", "Team", "2024-01-01", None),
    ];
    let mut q = ListQuery::new(day("2024-01-02"));
    let matched = q.matching(rows);
    assert_eq!(matched.len(), 2);
    q.offset = 5;
    assert!(q.page(matched).is_empty());
  }

  #[test]
  fn applicable_window_respects_half_open_range() {
    let rows = vec![
      row("10", "Dept", "2024-01-01", Some("2024-06-01")),
      row("10", "Department", "2024-06-01", None),
    ];
    assert_eq!(applicable_on(&rows, day("2024-05-31")).unwrap().label, "Dept");
    assert_eq!(applicable_on(&rows, day("2024-06-01")).unwrap().label, "Department");
    assert!(applicable_on(&rows, day("2023-12-31")).is_none());
  }
}
