//! # Constraint expressions
//!
//! A DAP2 constraint expression selects variables and, per dimension, a
//! hyperslab `[start:stride:stop]`. The core consumes these but never
//! invents a query language beyond the hyperslab constraints already
//! carried by variables.

use std::ops::RangeInclusive;

/// A single dimension's `(start, stride, stop)` selection, inclusive of `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: usize,
    pub stride: usize,
    pub stop: usize,
}

impl Hyperslab {
    pub fn whole(len: usize) -> Hyperslab {
        Hyperslab {
            start: 0,
            stride: 1,
            stop: len.saturating_sub(1),
        }
    }

    /// Number of elements this slab selects.
    pub fn count(&self) -> usize {
        if self.stop < self.start {
            0
        } else {
            (self.stop - self.start) / self.stride + 1
        }
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (self.start..=self.stop).step_by(self.stride)
    }

    pub fn as_range(&self) -> RangeInclusive<usize> {
        self.start..=self.stop
    }

    /// Parse a single `[a]`, `[a:b]` or `[a:s:b]` bracket (without the brackets).
    fn parse_one(s: &str) -> anyhow::Result<Hyperslab> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [a] => {
                let a = a.parse()?;
                Ok(Hyperslab {
                    start: a,
                    stride: 1,
                    stop: a,
                })
            }
            [a, b] => Ok(Hyperslab {
                start: a.parse()?,
                stride: 1,
                stop: b.parse()?,
            }),
            [a, s, b] => Ok(Hyperslab {
                start: a.parse()?,
                stride: s.parse()?,
                stop: b.parse()?,
            }),
            _ => Err(anyhow!("invalid hyperslab: {}", s)),
        }
    }
}

/// Parse a sequence of bracketed hyperslabs, e.g. `[0:2:10][3]`.
pub fn parse_hyperslab(q: &str) -> anyhow::Result<Vec<Hyperslab>> {
    let q = q.trim();
    if q.is_empty() {
        return Ok(Vec::new());
    }

    ensure!(
        q.starts_with('[') && q.ends_with(']'),
        "malformed hyperslab expression: {}",
        q
    );

    q.trim_start_matches('[')
        .trim_end_matches(']')
        .split("][")
        .map(Hyperslab::parse_one)
        .collect()
}

/// One `name[slab][slab]...` entry in a projection list.
#[derive(Debug, Clone)]
pub struct Projection {
    pub name: String,
    pub slab: Vec<Hyperslab>,
}

/// A full constraint expression: a comma-separated projection list.
#[derive(Debug, Clone, Default)]
pub struct Constraint {
    pub projection: Vec<Projection>,
}

impl Constraint {
    /// Parse a constraint expression. `None`/empty means "select everything".
    pub fn parse(q: &str) -> anyhow::Result<Constraint> {
        let q = q.trim();
        if q.is_empty() {
            return Ok(Constraint::default());
        }

        let projection = q
            .split(',')
            .map(|v| {
                let v = v.trim();
                match v.find('[') {
                    Some(i) => Ok(Projection {
                        name: v[..i].to_string(),
                        slab: parse_hyperslab(&v[i..])?,
                    }),
                    None => Ok(Projection {
                        name: v.to_string(),
                        slab: Vec::new(),
                    }),
                }
            })
            .collect::<anyhow::Result<Vec<Projection>>>()?;

        Ok(Constraint { projection })
    }

    pub fn is_empty(&self) -> bool {
        self.projection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_index() {
        let s = parse_hyperslab("[4]").unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s[0], Hyperslab { start: 4, stride: 1, stop: 4 });
    }

    #[test]
    fn parse_start_stop() {
        let s = parse_hyperslab("[0:10]").unwrap();
        assert_eq!(s[0].count(), 11);
    }

    #[test]
    fn parse_strided() {
        let s = parse_hyperslab("[1:2:7]").unwrap();
        assert_eq!(s[0].indices().collect::<Vec<_>>(), vec![1, 3, 5, 7]);
    }

    #[test]
    fn parse_multi_dim() {
        let s = parse_hyperslab("[0:1][2:2:6]").unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s[1].indices().collect::<Vec<_>>(), vec![2, 4, 6]);
    }

    #[test]
    fn parse_projection_list() {
        let c = Constraint::parse("temp[0:2],time").unwrap();
        assert_eq!(c.projection.len(), 2);
        assert_eq!(c.projection[0].name, "temp");
        assert_eq!(c.projection[1].slab.len(), 0);
    }
}
