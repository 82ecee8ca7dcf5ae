use rv_catalog::models::{Availability, MediaItem, MediaType};

pub struct MediaItemBuilder {
    item: MediaItem,
}

impl MediaItemBuilder {
    pub fn local(id: &str, title: &str) -> Self {
        Self {
            item: MediaItem::local(id, title, format!("/media/movies/{}.mkv", id)),
        }
    }

    pub fn remote(id: &str, title: &str) -> Self {
        Self {
            item: MediaItem::remote(id, title, format!("jf-{}", id)),
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.item.year = Some(year);
        self
    }

    pub fn with_thumbnail(mut self, url: &str) -> Self {
        self.item.thumbnail_url = Some(url.to_string());
        self
    }

    pub fn episode(mut self) -> Self {
        self.item.media_type = MediaType::Episode;
        self
    }

    pub fn build(self) -> MediaItem {
        self.item
    }
}

/// `count` local movies with ids `m0..`
pub fn local_items(count: usize) -> Vec<MediaItem> {
    (0..count)
        .map(|i| {
            MediaItemBuilder::local(&format!("m{i}"), &format!("Local Movie {i}"))
                .with_year(2000 + i as i32)
                .build()
        })
        .collect()
}

/// `total` remote items; the first `overlap` share ids with [`local_items`]
pub fn remote_items(total: usize, overlap: usize) -> Vec<MediaItem> {
    (0..total)
        .map(|i| {
            let id = if i < overlap {
                format!("m{i}")
            } else {
                format!("r{i}")
            };
            MediaItemBuilder::remote(&id, &format!("Remote Title {i}"))
                .with_thumbnail(&format!("http://jf/thumb/{id}.jpg"))
                .build()
        })
        .collect()
}

pub fn count_available(items: &[MediaItem], availability: Availability) -> usize {
    items
        .iter()
        .filter(|item| item.availability == availability)
        .count()
}
