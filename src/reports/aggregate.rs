use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::db::models::{
    FullConnectionGeoIpRecord, GeoipSummaryRecord, InternetHostRecord, MachineGeoIpRecord,
};
use crate::db::services::traffic_report_service::UNKNOWN_COUNTRY;

/// A share of a total, held in hundredths of a percent so equality and
/// ordering match the two-decimal text form exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percentage(u32);

impl Percentage {
    pub const ZERO: Percentage = Percentage(0);
    pub const FULL: Percentage = Percentage(10_000);

    /// `100 * part / total` rounded to two decimals; zero when `total` is zero.
    pub fn of(part: u64, total: u64) -> Self {
        if total == 0 {
            return Self::ZERO;
        }
        let part = u128::from(part.min(total));
        let total = u128::from(total);
        let hundredths = (part * 10_000 + total / 2) / total;
        Percentage(hundredths as u32)
    }

    pub fn hundredths(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// One contributing row of a country breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakdownRow {
    pub country: String,
    pub region: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl From<&GeoipSummaryRecord> for BreakdownRow {
    fn from(r: &GeoipSummaryRecord) -> Self {
        Self {
            country: r.country_name.clone(),
            region: r.region_name.clone(),
            rx_bytes: r.total_rx_bytes,
            tx_bytes: r.total_tx_bytes,
        }
    }
}

impl From<&MachineGeoIpRecord> for BreakdownRow {
    fn from(r: &MachineGeoIpRecord) -> Self {
        Self {
            country: r.country_name.clone(),
            region: r.region_name.clone(),
            rx_bytes: r.total_rx_bytes,
            tx_bytes: r.total_tx_bytes,
        }
    }
}

impl From<&FullConnectionGeoIpRecord> for BreakdownRow {
    fn from(r: &FullConnectionGeoIpRecord) -> Self {
        Self {
            country: r.country_name.clone(),
            region: r.region_name.clone(),
            rx_bytes: r.total_rx_bytes,
            tx_bytes: r.total_tx_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionTotals {
    pub region: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryBucket {
    pub country: String,
    /// Regions in first-encountered order.
    pub regions: Vec<RegionTotals>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_percent: Percentage,
    pub tx_percent: Percentage,
}

/// A flattened output line of one country bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakdownLine {
    Country {
        country: String,
        region: String,
        rx_bytes: u64,
        tx_bytes: u64,
        rx_percent: Percentage,
        tx_percent: Percentage,
    },
    Region {
        region: String,
        rx_bytes: u64,
        tx_bytes: u64,
    },
}

impl CountryBucket {
    pub fn is_unknown(&self) -> bool {
        self.country == UNKNOWN_COUNTRY
    }

    /// A single region is inlined on the country line; several regions get a
    /// parent line followed by one line per region. `Unknown` is always a
    /// single line with no region.
    pub fn lines(&self) -> Vec<BreakdownLine> {
        let inline_region = match self.regions.as_slice() {
            [only] if !self.is_unknown() => only.region.clone().unwrap_or_default(),
            _ => String::new(),
        };
        let mut lines = vec![BreakdownLine::Country {
            country: self.country.clone(),
            region: inline_region,
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
            rx_percent: self.rx_percent,
            tx_percent: self.tx_percent,
        }];
        if self.regions.len() > 1 && !self.is_unknown() {
            lines.extend(self.regions.iter().map(|r| BreakdownLine::Region {
                region: r.region.clone().unwrap_or_default(),
                rx_bytes: r.rx_bytes,
                tx_bytes: r.tx_bytes,
            }));
        }
        lines
    }
}

/// Traffic grouped by country, then region, with grand totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountryBreakdown {
    buckets: Vec<CountryBucket>,
    total_rx_bytes: u64,
    total_tx_bytes: u64,
}

impl CountryBreakdown {
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = BreakdownRow>,
    {
        let mut buckets: Vec<CountryBucket> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut total_rx_bytes = 0u64;
        let mut total_tx_bytes = 0u64;

        for row in rows {
            total_rx_bytes = total_rx_bytes.saturating_add(row.rx_bytes);
            total_tx_bytes = total_tx_bytes.saturating_add(row.tx_bytes);

            let slot = *index.entry(row.country.clone()).or_insert_with(|| {
                buckets.push(CountryBucket {
                    country: row.country.clone(),
                    regions: Vec::new(),
                    rx_bytes: 0,
                    tx_bytes: 0,
                    rx_percent: Percentage::ZERO,
                    tx_percent: Percentage::ZERO,
                });
                buckets.len() - 1
            });
            let bucket = &mut buckets[slot];
            bucket.rx_bytes = bucket.rx_bytes.saturating_add(row.rx_bytes);
            bucket.tx_bytes = bucket.tx_bytes.saturating_add(row.tx_bytes);

            match bucket.regions.iter_mut().find(|r| r.region == row.region) {
                Some(region) => {
                    region.rx_bytes = region.rx_bytes.saturating_add(row.rx_bytes);
                    region.tx_bytes = region.tx_bytes.saturating_add(row.tx_bytes);
                }
                None => bucket.regions.push(RegionTotals {
                    region: row.region,
                    rx_bytes: row.rx_bytes,
                    tx_bytes: row.tx_bytes,
                }),
            }
        }

        // Country shares are taken over geolocated traffic; `Unknown` is a share
        // of everything.
        let (located_rx, located_tx) = buckets
            .iter()
            .filter(|b| !b.is_unknown())
            .fold((0u64, 0u64), |(rx, tx), b| {
                (rx.saturating_add(b.rx_bytes), tx.saturating_add(b.tx_bytes))
            });
        for bucket in &mut buckets {
            let (rx_base, tx_base) = if bucket.is_unknown() {
                (total_rx_bytes, total_tx_bytes)
            } else {
                (located_rx, located_tx)
            };
            bucket.rx_percent = Percentage::of(bucket.rx_bytes, rx_base);
            bucket.tx_percent = Percentage::of(bucket.tx_bytes, tx_base);
        }

        Self {
            buckets,
            total_rx_bytes,
            total_tx_bytes,
        }
    }

    /// Buckets in first-encountered order.
    pub fn buckets(&self) -> &[CountryBucket] {
        &self.buckets
    }

    pub fn unknown(&self) -> Option<&CountryBucket> {
        self.buckets.iter().find(|b| b.is_unknown())
    }

    pub fn total_rx_bytes(&self) -> u64 {
        self.total_rx_bytes
    }

    pub fn total_tx_bytes(&self) -> u64 {
        self.total_tx_bytes
    }

    pub fn total_rx_percent(&self) -> Percentage {
        if self.total_rx_bytes == 0 {
            Percentage::ZERO
        } else {
            Percentage::FULL
        }
    }

    pub fn total_tx_percent(&self) -> Percentage {
        if self.total_tx_bytes == 0 {
            Percentage::ZERO
        } else {
            Percentage::FULL
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostEntry {
    pub host: String,
    pub isp: String,
}

/// Remote hosts contacted during the window, without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostListing {
    entries: Vec<HostEntry>,
}

impl HostListing {
    /// Hostname when known, otherwise the address; exact duplicate pairs are
    /// dropped keeping the first occurrence.
    pub fn from_records(records: &[InternetHostRecord]) -> Self {
        let mut seen = HashSet::new();
        let entries = records
            .iter()
            .map(|r| HostEntry {
                host: r
                    .global_hostname
                    .clone()
                    .unwrap_or_else(|| r.global_ip.to_string()),
                isp: r.isp.clone().unwrap_or_default(),
            })
            .filter(|entry| seen.insert(entry.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }
}
