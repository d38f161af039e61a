//! Static field schemas for every entity kind.
//!
//! Each [`EntityKind`] owns a [`FieldSet`]: the ordered list of declared
//! fields, split into *simple* fields (copied straight out of the first JSON
//! payload) and *expandable* fields (built from nested data the first time
//! they are read). A kind may also carry a fill template, the secondary
//! search used to complete a sparse record once its identifier is known.

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Capabilities an entity kind may have
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KindFlags: u32 {
        /// Instances may be shared across queries through the identity cache
        const CACHEABLE = 1 << 0;
        /// One fill request completes every declared field at once
        const FILL_COVERS_ALL = 1 << 1;
    }
}

/// The kinds of remote record this crate knows how to represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Publication,
    Author,
    Researcher,
    Organization,
    Grant,
    Journal,
    Category,
    City,
    Country,
    State,
}

impl EntityKind {
    /// Every kind, in declaration order.
    pub const ALL: [EntityKind; 10] = [
        EntityKind::Publication,
        EntityKind::Author,
        EntityKind::Researcher,
        EntityKind::Organization,
        EntityKind::Grant,
        EntityKind::Journal,
        EntityKind::Category,
        EntityKind::City,
        EntityKind::Country,
        EntityKind::State,
    ];

    /// Returns the display name of the kind
    pub fn name(&self) -> &'static str {
        match self {
            EntityKind::Publication => "Publication",
            EntityKind::Author => "Author",
            EntityKind::Researcher => "Researcher",
            EntityKind::Organization => "Organization",
            EntityKind::Grant => "Grant",
            EntityKind::Journal => "Journal",
            EntityKind::Category => "Category",
            EntityKind::City => "City",
            EntityKind::Country => "Country",
            EntityKind::State => "State",
        }
    }

    /// Returns the static schema for this kind
    pub fn field_set(&self) -> &'static FieldSet {
        match self {
            EntityKind::Publication => &PUBLICATION,
            EntityKind::Author => &AUTHOR,
            EntityKind::Researcher => &RESEARCHER,
            EntityKind::Organization => &ORGANIZATION,
            EntityKind::Grant => &GRANT,
            EntityKind::Journal => &JOURNAL,
            EntityKind::Category => &CATEGORY,
            EntityKind::City => &CITY,
            EntityKind::Country => &COUNTRY,
            EntityKind::State => &STATE,
        }
    }

    /// Whether this kind describes a person (authors and researchers)
    pub fn is_person(&self) -> bool {
        matches!(self, EntityKind::Author | EntityKind::Researcher)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Declared fields and lazy-resolution settings for one entity kind
#[derive(Debug)]
pub struct FieldSet {
    /// Fields assigned directly from the first payload
    pub simple: &'static [&'static str],

    /// Fields built from nested payload data on first access
    pub expandable: &'static [&'static str],

    /// Payload key consulted for the identifier when `id` is absent
    pub id_fallback: Option<&'static str>,

    /// Secondary search completing a record; `{}` is replaced by its identifier
    pub fill_template: Option<&'static str>,

    /// Capability flags
    pub flags: KindFlags,
}

impl FieldSet {
    /// Declared fields: simple fields first, then expandable ones
    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.simple.iter().chain(self.expandable.iter()).copied()
    }

    /// Look up a declared field, returning its static name
    pub fn field(&self, name: &str) -> Option<&'static str> {
        self.fields().find(|f| *f == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn is_simple(&self, name: &str) -> bool {
        self.simple.contains(&name)
    }

    pub fn is_expandable(&self, name: &str) -> bool {
        self.expandable.contains(&name)
    }

    pub fn is_cacheable(&self) -> bool {
        self.flags.contains(KindFlags::CACHEABLE)
    }

    pub fn fill_covers_all(&self) -> bool {
        self.flags.contains(KindFlags::FILL_COVERS_ALL)
    }
}

const PERSON_FILL: &str = r#"search publications where researchers.id="{}" return researchers limit 1"#;

const ORGANIZATION_FILL: &str =
    r#"search publications where research_orgs.id="{}" return research_orgs limit 1"#;

static PUBLICATION: FieldSet = FieldSet {
    simple: &[
        "altmetric",
        "book_doi",
        "book_series_title",
        "book_title",
        "date",
        "date_inserted",
        "doi",
        "field_citation_ratio",
        "id",
        "issn",
        "issue",
        "linkout",
        "mesh_terms",
        "open_access",
        "pages",
        "pmcid",
        "pmid",
        "proceedings_title",
        "publisher",
        "references",
        "relative_citation_ratio",
        "research_org_country_names",
        "research_org_state_names",
        "supporting_grant_ids",
        "times_cited",
        "title",
        "type",
        "volume",
        "year",
    ],
    expandable: &["author_affiliations", "journal"],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::CACHEABLE,
};

// Author affiliations only make sense relative to the publication that
// listed them, so authors are never shared across queries.
static AUTHOR: FieldSet = FieldSet {
    simple: &["id", "first_name", "last_name", "orcid"],
    expandable: &["current_organization", "affiliations"],
    id_fallback: Some("researcher_id"),
    fill_template: Some(PERSON_FILL),
    flags: KindFlags::empty(),
};

static RESEARCHER: FieldSet = FieldSet {
    simple: &["id", "first_name", "last_name", "orcid"],
    expandable: &["current_organization", "affiliations"],
    id_fallback: Some("researcher_id"),
    fill_template: Some(PERSON_FILL),
    flags: KindFlags::CACHEABLE,
};

static ORGANIZATION: FieldSet = FieldSet {
    simple: &[
        "acronym",
        "city",
        "city_id",
        "country",
        "country_code",
        "country_name",
        "id",
        "name",
        "state",
        "state_code",
    ],
    expandable: &[],
    id_fallback: None,
    fill_template: Some(ORGANIZATION_FILL),
    flags: KindFlags::CACHEABLE.union(KindFlags::FILL_COVERS_ALL),
};

static GRANT: FieldSet = FieldSet {
    simple: &[
        "abstract",
        "active_year",
        "date_inserted",
        "end_date",
        "funding_aud",
        "funding_cad",
        "funding_chf",
        "funding_eur",
        "funding_gbp",
        "funding_jpy",
        "funding_org_acronym",
        "funding_org_city",
        "funding_org_name",
        "funding_usd",
        "id",
        "language",
        "linkout",
        "original_title",
        "project_num",
        "research_org_name",
        "start_date",
        "start_year",
        "title",
        "title_language",
    ],
    expandable: &[
        "FOR",
        "FOR_first",
        "HRCS_HC",
        "HRCS_RAC",
        "RCDC",
        "funder_countries",
        "funders",
        "research_org_cities",
        "research_org_countries",
        "research_org_state_codes",
        "research_orgs",
        "researchers",
    ],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::CACHEABLE,
};

static JOURNAL: FieldSet = FieldSet {
    simple: &["id", "title"],
    expandable: &[],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::CACHEABLE,
};

static CATEGORY: FieldSet = FieldSet {
    simple: &["id", "name"],
    expandable: &[],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::CACHEABLE,
};

static CITY: FieldSet = FieldSet {
    simple: &["id", "name"],
    expandable: &[],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::CACHEABLE,
};

static COUNTRY: FieldSet = FieldSet {
    simple: &["id", "name"],
    expandable: &[],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::empty(),
};

static STATE: FieldSet = FieldSet {
    simple: &["id", "name"],
    expandable: &[],
    id_fallback: None,
    fill_template: None,
    flags: KindFlags::empty(),
};
