//! Finds the spaces around a point: those containing it, then those whose
//! edge falls within the search radius.

use uuid::Uuid;

use crate::{
    Error, Result,
    db::{Store, keys},
    models::{Location, MAX_SPACE_RADIUS, SpaceWithDistance},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The point lies inside the space.
    Contained,
    /// The space's edge is within the search radius of the point.
    Overlapping,
}

pub(crate) fn classify(distance: f64, space_radius: f64, search_radius: f64) -> Option<Placement> {
    let to_edge = distance - space_radius;
    if to_edge < 0.0 {
        Some(Placement::Contained)
    } else if to_edge < search_radius {
        Some(Placement::Overlapping)
    } else {
        None
    }
}

/// Contained spaces (distance 0) first, then overlapping ones, each group
/// nearest first. `offset`/`count` page over the combined list.
pub async fn get_spaces_by_location(
    store: &Store,
    location: Location,
    radius: f64,
    offset: i64,
    count: i64,
) -> Result<Vec<SpaceWithDistance>> {
    location.validate()?;
    if !radius.is_finite() || radius < 0.0 {
        return Err(Error::Validation(format!("invalid search radius {radius}")));
    }

    let hits = store
        .geo_search(keys::SPACE_COORDINATES, location, radius + MAX_SPACE_RADIUS)
        .await?;

    let mut contained = Vec::new();
    let mut overlapping = Vec::new();
    for hit in hits {
        let id: Uuid = hit
            .member
            .parse()
            .map_err(|_| Error::corrupt(keys::SPACE_COORDINATES, format!("{} is not an id", hit.member)))?;
        let space = store.get_space(id).await?;

        match classify(hit.distance, space.radius, radius) {
            Some(Placement::Contained) => contained.push(SpaceWithDistance { space, distance: 0.0 }),
            Some(Placement::Overlapping) => overlapping.push(SpaceWithDistance {
                space,
                distance: hit.distance,
            }),
            None => {}
        }
    }

    contained.extend(overlapping);
    let page = contained.into_iter().skip(offset.max(0) as usize);
    Ok(if count < 0 {
        page.collect()
    } else {
        page.take(count as usize).collect()
    })
}
