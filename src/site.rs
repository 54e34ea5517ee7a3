//! Per-record site annotations and genomic regions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ReadError};

/// Non-genotype metadata of one variant record
///
/// INFO values live in an unordered map; their on-disk order is fixed by the
/// writer's declared INFO field list, not by this container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SiteInfo {
    chrom: String,
    pos: u64,
    ref_allele: String,
    alt_allele: String,
    info: HashMap<String, String>,
}

impl SiteInfo {
    pub fn new(
        chrom: impl Into<String>,
        pos: u64,
        ref_allele: impl Into<String>,
        alt_allele: impl Into<String>,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
            ref_allele: ref_allele.into(),
            alt_allele: alt_allele.into(),
            info: HashMap::new(),
        }
    }

    #[must_use]
    pub fn chromosome(&self) -> &str {
        &self.chrom
    }

    /// 1-based locus
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[must_use]
    pub fn ref_allele(&self) -> &str {
        &self.ref_allele
    }

    #[must_use]
    pub fn alt_allele(&self) -> &str {
        &self.alt_allele
    }

    /// INFO value for `key`, empty when absent
    #[must_use]
    pub fn info(&self, key: &str) -> &str {
        self.info.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set_info(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.info.insert(key.into(), value.into());
    }

    /// Number of reference positions the variant covers
    #[must_use]
    pub fn span(&self) -> u64 {
        self.ref_allele.len().max(self.alt_allele.len()) as u64
    }

    /// Last reference position touched by the variant
    #[must_use]
    pub fn end_position(&self) -> u64 {
        self.pos + self.span().saturating_sub(1)
    }

    /// Replaces all fields in place; decode paths reuse one allocation
    pub(crate) fn assign(
        &mut self,
        chrom: String,
        pos: u64,
        ref_allele: String,
        alt_allele: String,
        info: HashMap<String, String>,
    ) {
        self.chrom = chrom;
        self.pos = pos;
        self.ref_allele = ref_allele;
        self.alt_allele = alt_allele;
        self.info = info;
    }
}

/// Inclusive genomic interval on one chromosome
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    chrom: String,
    beg: u32,
    end: u32,
}

impl Region {
    pub fn new(chrom: impl Into<String>, beg: u32, end: u32) -> Self {
        Self {
            chrom: chrom.into(),
            beg,
            end,
        }
    }

    /// The whole of one chromosome
    pub fn chromosome(chrom: impl Into<String>) -> Self {
        Self::new(chrom, 1, u32::MAX)
    }

    #[must_use]
    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    #[must_use]
    pub fn beg(&self) -> u32 {
        self.beg
    }

    #[must_use]
    pub fn end(&self) -> u32 {
        self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.beg == 1 && self.end == u32::MAX {
            write!(f, "{}", self.chrom)
        } else {
            write!(f, "{}:{}-{}", self.chrom, self.beg, self.end)
        }
    }
}

impl FromStr for Region {
    type Err = Error;

    /// Parses `chr`, `chr:pos` or `chr:beg-end`
    fn from_str(s: &str) -> Result<Self, Error> {
        let bad = || Error::Read(ReadError::InvalidRegion(s.to_string()));
        let Some((chrom, range)) = s.split_once(':') else {
            if s.is_empty() {
                return Err(bad());
            }
            return Ok(Self::chromosome(s));
        };
        if chrom.is_empty() {
            return Err(bad());
        }
        let (beg, end) = match range.split_once('-') {
            Some((b, e)) => (
                b.parse::<u32>().map_err(|_| bad())?,
                e.parse::<u32>().map_err(|_| bad())?,
            ),
            None => {
                let pos = range.parse::<u32>().map_err(|_| bad())?;
                (pos, pos)
            }
        };
        if beg == 0 || end < beg {
            return Err(bad());
        }
        Ok(Self::new(chrom, beg, end))
    }
}

/// Rule deciding whether a variant's span falls inside a query region
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CoordBound {
    /// Any overlap between the variant span and the region
    #[default]
    Any,
    /// The variant's left endpoint lies inside the region
    LeftPoint,
    /// The variant's right endpoint lies inside the region
    RightPoint,
    /// The variant's midpoint lies inside the region
    Midpoint,
}

/// Evaluates `bound` for `site` against `region`
#[must_use]
pub fn region_compare(bound: CoordBound, site: &SiteInfo, region: &Region) -> bool {
    if site.chromosome() != region.chrom() {
        return false;
    }
    let beg = u64::from(region.beg());
    let end = u64::from(region.end());
    let left = site.position();
    let right = site.end_position();
    match bound {
        CoordBound::Any => left <= end && right >= beg,
        CoordBound::LeftPoint => beg <= left && left <= end,
        CoordBound::RightPoint => beg <= right && right <= end,
        CoordBound::Midpoint => {
            let mid = (left + right) / 2;
            beg <= mid && mid <= end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parsing() {
        let r: Region = "1:15-35".parse().unwrap();
        assert_eq!(r, Region::new("1", 15, 35));

        let r: Region = "chr20".parse().unwrap();
        assert_eq!(r, Region::chromosome("chr20"));

        let r: Region = "X:12345".parse().unwrap();
        assert_eq!(r, Region::new("X", 12345, 12345));

        assert!("".parse::<Region>().is_err());
        assert!(":1-2".parse::<Region>().is_err());
        assert!("1:b-2".parse::<Region>().is_err());
        assert!("1:10-2".parse::<Region>().is_err());
    }

    #[test]
    fn bounding_policies() {
        // a deletion spanning [100, 104]
        let site = SiteInfo::new("1", 100, "ACGTA", "A");
        assert_eq!(site.end_position(), 104);

        let hit = Region::new("1", 102, 110);
        assert!(region_compare(CoordBound::Any, &site, &hit));
        assert!(!region_compare(CoordBound::LeftPoint, &site, &hit));
        assert!(region_compare(CoordBound::RightPoint, &site, &hit));
        assert!(region_compare(CoordBound::Midpoint, &site, &hit));

        let left_only = Region::new("1", 98, 101);
        assert!(region_compare(CoordBound::Any, &site, &left_only));
        assert!(region_compare(CoordBound::LeftPoint, &site, &left_only));
        assert!(!region_compare(CoordBound::RightPoint, &site, &left_only));
        assert!(!region_compare(CoordBound::Midpoint, &site, &left_only));

        let miss = Region::new("1", 110, 120);
        assert!(!region_compare(CoordBound::Any, &site, &miss));

        let other_chrom = Region::new("2", 90, 120);
        assert!(!region_compare(CoordBound::Any, &site, &other_chrom));
    }

    #[test]
    fn info_defaults_to_empty() {
        let mut site = SiteInfo::new("1", 1, "A", "C");
        assert_eq!(site.info("AF"), "");
        site.set_info("AF", "0.01");
        assert_eq!(site.info("AF"), "0.01");
    }
}
