use crate::catalog::{quote_literal, CatalogSession};
use gpctl_common::{Result, SegmentDescriptor};
use tracing::info;

pub const SEGMENT_CONFIGURATION_QUERY: &str = "SELECT dbid::int AS dbid, content::int AS content, \
     role::text AS role, preferred_role::text AS preferred_role, mode::text AS mode, \
     status::text AS status, port::int AS port, datadir, hostname, address \
     FROM pg_catalog.gp_segment_configuration ORDER BY content ASC, role DESC";

/// gp_add_segment_primary numbers content ids from 1; shift them to start at 0
pub const RENUMBER_CONTENT_IDS: &str =
    "UPDATE gp_segment_configuration SET content = content - 1 WHERE content > 0";

/// Records segments in the coordinator's segment-configuration catalog
pub struct Registrar<'a> {
    session: &'a dyn CatalogSession,
}

impl<'a> Registrar<'a> {
    pub fn new(session: &'a dyn CatalogSession) -> Self {
        Self { session }
    }

    /// Insert the coordinator as dbid 1, content -1, primary, up
    pub async fn register_coordinator(&self, coordinator: &SegmentDescriptor) -> Result<()> {
        info!("Registering coordinator {}:{}", coordinator.hostname, coordinator.port);
        let sql = format!(
            "SELECT pg_catalog.gp_add_segment(1::int2, -1::int2, 'p', 'p', 'n', 'u', {}, {}, {}, {})",
            coordinator.port,
            quote_literal(&coordinator.hostname),
            quote_literal(&coordinator.address),
            quote_literal(&coordinator.data_directory),
        );
        self.session.execute(&sql).await
    }

    /// Add every primary, letting the catalog assign dbids and content ids
    pub async fn register_primaries(&self, primaries: &[SegmentDescriptor]) -> Result<()> {
        info!("Registering {} primary segments", primaries.len());
        for seg in primaries {
            let sql = format!(
                "SELECT pg_catalog.gp_add_segment_primary({}, {}, {}, {})",
                quote_literal(&seg.hostname),
                quote_literal(&seg.address),
                seg.port,
                quote_literal(&seg.data_directory),
            );
            self.session.execute(&sql).await?;
        }

        self.session.execute(RENUMBER_CONTENT_IDS).await
    }

    /// Every catalog row, ordered by content id then primary before mirror
    pub async fn read_catalog(&self) -> Result<Vec<SegmentDescriptor>> {
        let mut segments = self.session.query_segments(SEGMENT_CONFIGURATION_QUERY).await?;
        sort_segments(&mut segments);
        Ok(segments)
    }
}

pub fn sort_segments(segments: &mut [SegmentDescriptor]) {
    segments.sort_by(|a, b| {
        a.content_id
            .cmp(&b.content_id)
            .then_with(|| b.role.code().cmp(&a.role.code()))
    });
}

/// Rows with content >= 0 whose acting or preferred role is primary
pub fn select_primaries(segments: &[SegmentDescriptor]) -> Vec<SegmentDescriptor> {
    segments.iter().filter(|s| s.is_primary()).cloned().collect()
}
