#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Power,
    Mode,
    Temperature,
    Fan,
    Vane,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Self::Power,
        Self::Mode,
        Self::Temperature,
        Self::Fan,
        Self::Vane,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Mode => "mode",
            Self::Temperature => "temperature",
            Self::Fan => "fan",
            Self::Vane => "vane",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionTopics {
    pub state: String,
    pub command: String,
}

impl DimensionTopics {
    fn new(prefix: &str, dimension: Dimension) -> Self {
        Self {
            state: format!("{prefix}/{}/state", dimension.as_str()),
            command: format!("{prefix}/{}/set", dimension.as_str()),
        }
    }
}

/// Every topic the gateway talks on, derived once from the configured prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    pub availability: String,
    pub info: String,
    pub current_temperature_state: String,
    dimensions: [DimensionTopics; 5],
}

impl TopicSet {
    pub fn new(prefix: &str) -> Self {
        Self {
            availability: format!("{prefix}/availability"),
            info: format!("{prefix}/info"),
            current_temperature_state: format!("{prefix}/current_temperature/state"),
            dimensions: Dimension::ALL.map(|dimension| DimensionTopics::new(prefix, dimension)),
        }
    }

    pub fn dimension(&self, dimension: Dimension) -> &DimensionTopics {
        &self.dimensions[dimension as usize]
    }

    pub fn state(&self, dimension: Dimension) -> &str {
        &self.dimension(dimension).state
    }

    pub fn command(&self, dimension: Dimension) -> &str {
        &self.dimension(dimension).command
    }

    pub fn command_topics(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|topics| topics.command.as_str())
    }

    /// Exact match of an inbound topic against the five command topics.
    pub fn match_command(&self, topic: &str) -> Option<Dimension> {
        Dimension::ALL
            .into_iter()
            .find(|dimension| self.command(*dimension) == topic)
    }
}
