//! Job listing order and pagination.

use crate::model::{Coordinates, JobPosting};

/// One page of a ranked job listing.
#[derive(Debug, Clone)]
pub struct Page {
    pub jobs: Vec<JobPosting>,
    /// Zero-based page index after wrapping.
    pub index: usize,
    pub pages: usize,
    pub total: usize,
}

/// Rank open jobs for a viewer.
///
/// With viewer coordinates the order is nearest first; jobs without
/// coordinates sort after all located ones. Ties break on the earlier start
/// time, then on the job id, so the order is total and stable across turns.
/// Without viewer coordinates the order is plain id order.
pub fn rank_jobs(mut jobs: Vec<JobPosting>, viewer: Option<Coordinates>) -> Vec<JobPosting> {
    match viewer {
        Some(here) => {
            jobs.sort_by(|a, b| {
                let da = a
                    .coords
                    .map(|c| here.distance_m(&c))
                    .unwrap_or(f64::INFINITY);
                let db = b
                    .coords
                    .map(|c| here.distance_m(&c))
                    .unwrap_or(f64::INFINITY);
                da.total_cmp(&db)
                    .then_with(|| a.starts_at.cmp(&b.starts_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        None => {
            jobs.sort_by(|a, b| a.id.cmp(&b.id));
        }
    }
    jobs
}

/// Slice a ranked listing into one page, wrapping the requested index so a
/// repeated "list" action cycles through the pages.
pub fn paginate(jobs: Vec<JobPosting>, requested: usize, page_size: usize) -> Page {
    let total = jobs.len();
    let page_size = page_size.max(1);
    let pages = total.div_ceil(page_size).max(1);
    let index = requested % pages;
    let start = index * page_size;
    let end = (start + page_size).min(total);
    let jobs = if start < total {
        jobs[start..end].to_vec()
    } else {
        Vec::new()
    };
    Page {
        jobs,
        index,
        pages,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobStatus;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn job(title: &str, coords: Option<Coordinates>, start_offset_h: i64) -> JobPosting {
        let now = Utc::now();
        JobPosting {
            id: Uuid::new_v4(),
            title: title.to_string(),
            address: "somewhere".to_string(),
            coords,
            total_capacity: 3,
            remaining: 3,
            status: JobStatus::Open,
            starts_at: now + Duration::hours(start_offset_h),
            ends_at: now + Duration::hours(start_offset_h + 8),
            created_at: now,
        }
    }

    #[test]
    fn nearest_first_with_unlocated_last() {
        let viewer = Coordinates {
            lat: 25.0330,
            lng: 121.5654,
        };
        let near = job(
            "near",
            Some(Coordinates {
                lat: 25.0340,
                lng: 121.5650,
            }),
            5,
        );
        let far = job(
            "far",
            Some(Coordinates {
                lat: 24.1477,
                lng: 120.6736,
            }),
            1,
        );
        let unlocated = job("unlocated", None, 1);
        let ranked = rank_jobs(vec![far.clone(), unlocated, near], Some(viewer));
        assert_eq!(ranked[0].title, "near");
        assert_eq!(ranked[1].title, "far");
        assert_eq!(ranked[2].title, "unlocated");
    }

    #[test]
    fn no_viewer_coords_falls_back_to_id_order() {
        let a = job("a", None, 10);
        let b = job("b", None, 2);
        let smallest = a.id.min(b.id);
        let ranked = rank_jobs(vec![a, b], None);
        assert_eq!(ranked[0].id, smallest);
    }

    #[test]
    fn pagination_wraps() {
        let jobs: Vec<_> = (0..7).map(|i| job(&format!("j{i}"), None, i)).collect();
        let page = paginate(jobs.clone(), 0, 5);
        assert_eq!(page.jobs.len(), 5);
        assert_eq!(page.pages, 2);
        let page = paginate(jobs.clone(), 1, 5);
        assert_eq!(page.jobs.len(), 2);
        let page = paginate(jobs, 2, 5);
        assert_eq!(page.index, 0);
        assert_eq!(page.jobs.len(), 5);
    }

    #[test]
    fn empty_listing_is_one_empty_page() {
        let page = paginate(Vec::new(), 3, 5);
        assert_eq!(page.pages, 1);
        assert_eq!(page.index, 0);
        assert!(page.jobs.is_empty());
    }
}
