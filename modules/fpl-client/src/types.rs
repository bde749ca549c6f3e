use serde::Deserialize;

/// Envelope of `bootstrap-static/`: the player directory plus team and
/// position lookup tables. Fields we don't consume are left undeclared.
#[derive(Debug, Clone, Deserialize)]
pub struct Bootstrap {
    pub elements: Vec<Element>,
    pub teams: Vec<Team>,
    pub element_types: Vec<ElementType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Element {
    pub id: u32,
    pub first_name: String,
    pub second_name: String,
    #[serde(default)]
    pub web_name: String,
    pub team: u32,
    pub element_type: u32,
    /// Price in tenths of a million.
    pub now_cost: u32,
}

impl Element {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.second_name)
    }

    /// Price in millions; the wire value is tenths.
    pub fn price_millions(&self) -> f64 {
        f64::from(self.now_cost) / 10.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Team {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ElementType {
    pub id: u32,
    pub singular_name_short: String,
}

/// Envelope of `element-summary/{id}/`. Only the per-gameweek history is
/// consumed; fixtures and past seasons are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ElementSummary {
    #[serde(default)]
    pub history: Vec<GameweekHistory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameweekHistory {
    pub element: u32,
    pub round: u32,
    pub total_points: i32,
    pub minutes: u32,
    pub goals_scored: u32,
    pub assists: u32,
    pub clean_sheets: u32,
    pub bonus: u32,
    pub opponent_team: u32,
    pub was_home: bool,
    #[serde(default)]
    pub kickoff_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fixture {
    pub id: u32,
    #[serde(default)]
    pub event: Option<u32>,
    pub team_h: u32,
    pub team_a: u32,
    #[serde(default)]
    pub team_h_score: Option<u32>,
    #[serde(default)]
    pub team_a_score: Option<u32>,
    #[serde(default)]
    pub kickoff_time: Option<String>,
}
