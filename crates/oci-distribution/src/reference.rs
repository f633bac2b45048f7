use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// NAME_TOTAL_LENGTH_MAX is the maximum total number of characters in a repository name.
const NAME_TOTAL_LENGTH_MAX: usize = 255;

/// The tag used when a reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

/// The reasons an image reference can be rejected.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// There is no `/` separating the registry host from the repository
    MissingRegistry,
    /// The registry host before the first `/` is empty
    RegistryEmpty,
    /// The repository between the first `/` and the first `:` is empty
    NameEmpty,
    /// The repository name exceeds the maximum length
    NameTooLong,
    /// A `:` was present but nothing follows it
    TagEmpty,
    /// The registry, the last repository segment or the tag cannot be used as
    /// a directory name (`.`, `..`, or containing a path separator)
    UnsafePathSegment(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingRegistry => {
                write!(f, "reference must be of the form <host>/<repository>[:<tag>]")
            }
            ParseError::RegistryEmpty => write!(f, "registry host must not be empty"),
            ParseError::NameEmpty => write!(f, "repository name must not be empty"),
            ParseError::NameTooLong => write!(
                f,
                "repository name must not be more than {} characters",
                NAME_TOTAL_LENGTH_MAX
            ),
            ParseError::TagEmpty => write!(f, "tag must not be empty"),
            ParseError::UnsafePathSegment(segment) => {
                write!(f, "{:?} cannot be used as a directory name", segment)
            }
        }
    }
}

impl Error for ParseError {}

/// Reference identifies an image by registry host, repository and tag.
///
/// The registry host is everything before the first `/`. The remainder is split
/// at its first `:` into repository and tag. Without a `:` the tag is `latest`.
///
/// # Examples
///
/// ```
/// use oci_distribution::Reference;
///
/// let reference: Reference = "registry.example.com/library/app:v1".parse().unwrap();
///
/// assert_eq!("registry.example.com", reference.registry());
/// assert_eq!("library/app", reference.repository());
/// assert_eq!("v1", reference.tag());
/// assert_eq!("app", reference.name());
/// ```
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    tag: String,
}

impl Reference {
    /// registry returns the host of the registry, including any port.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// repository returns the name of the repository.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// tag returns the object's tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// name returns the last path segment of the repository, used as the
    /// short display name of the image.
    pub fn name(&self) -> &str {
        match self.repository.rfind('/') {
            Some(i) => &self.repository[i + 1..],
            None => &self.repository,
        }
    }

    /// whole returns the whole reference.
    pub fn whole(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl FromStr for Reference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::try_from(s)
    }
}

impl TryFrom<&str> for Reference {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let (registry, remainder) = s.split_once('/').ok_or(ParseError::MissingRegistry)?;
        // Only the first colon splits, later ones belong to the tag.
        let (repository, tag) = match remainder.split_once(':') {
            Some((repository, tag)) => (repository, tag),
            None => (remainder, DEFAULT_TAG),
        };

        if registry.is_empty() {
            return Err(ParseError::RegistryEmpty);
        }
        if repository.is_empty() {
            return Err(ParseError::NameEmpty);
        }
        if repository.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ParseError::NameTooLong);
        }
        if tag.is_empty() {
            return Err(ParseError::TagEmpty);
        }

        let reference = Reference {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
        };
        // Registry, name and tag each become one directory of the image layout.
        if reference.name().is_empty() {
            return Err(ParseError::NameEmpty);
        }
        for segment in &[reference.registry(), reference.name(), reference.tag()] {
            if is_unsafe_segment(segment) {
                return Err(ParseError::UnsafePathSegment((*segment).to_owned()));
            }
        }
        Ok(reference)
    }
}

fn is_unsafe_segment(segment: &str) -> bool {
    segment == "." || segment == ".." || segment.contains(&['/', '\\'][..])
}

impl TryFrom<String> for Reference {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Reference::try_from(s.as_str())
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.whole()
    }
}
