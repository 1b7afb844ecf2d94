//! Stage inputs built from the request and earlier stage outputs.

use super::model::TripRequest;
use crate::tools::amap::{TEXT_SEARCH_TOOL, WEATHER_TOOL};

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Attraction search input. Includes a sample tool call keyed on the first
/// preference for the model to reuse; the engine only executes calls that
/// appear in completion text.
pub fn attraction_query(request: &TripRequest) -> String {
    let keywords = request
        .preferences
        .first()
        .map(String::as_str)
        .unwrap_or("景点");
    format!(
        "Use {tool} to search for {keywords} attractions in {city}.\n[TOOL_CALL:{tool}:keywords={keywords},city={city}]",
        tool = TEXT_SEARCH_TOOL,
        keywords = keywords,
        city = request.destination
    )
}

/// Hotel search input; the attraction stage's output is quoted verbatim.
pub fn lodging_query(request: &TripRequest, attractions: &str) -> String {
    format!(
        "Use {tool} to search for hotels in {city}. Hotel preferences: {prefs}. Budget: {budget}.\n\
         Attractions found so far:\n{attractions}\n\
         [TOOL_CALL:{tool}:keywords=酒店,city={city}]",
        tool = TEXT_SEARCH_TOOL,
        city = request.destination,
        prefs = list_or_none(&request.hotel_preferences),
        budget = request.budget,
        attractions = attractions
    )
}

/// Weather input; the lodging stage's output is quoted verbatim.
pub fn weather_query(request: &TripRequest, hotels: &str) -> String {
    format!(
        "Query the weather in {city}.\nHotels chosen so far:\n{hotels}\n[TOOL_CALL:{tool}:city={city}]",
        tool = WEATHER_TOOL,
        city = request.destination,
        hotels = hotels
    )
}

/// Synthesis input embedding all three stage outputs verbatim.
pub fn synthesis_query(request: &TripRequest, attractions: &str, hotels: &str, weather: &str) -> String {
    let duration = request
        .duration_days()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "?".to_string());
    format!(
        "Create a trip plan for {city}.\n\n\
         Basics:\n\
         - Duration: {duration} day(s), from {start} to {end}\n\
         - Budget level: {budget}\n\
         - Preferences: {prefs}\n\
         - Hotel preferences: {hotel_prefs}\n\n\
         Raw attraction information:\n{attractions}\n\n\
         Raw hotel information:\n{hotels}\n\n\
         Raw weather forecast:\n{weather}\n\n\
         Return one complete, valid JSON object in the structure from your instructions. \
         No Markdown fences, no explanations.",
        city = request.destination,
        duration = duration,
        start = request.start_date,
        end = request.end_date,
        budget = request.budget,
        prefs = list_or_none(&request.preferences),
        hotel_prefs = list_or_none(&request.hotel_preferences),
        attractions = attractions,
        hotels = hotels,
        weather = weather
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::parser::extract_tool_calls;

    #[test]
    fn test_attraction_query_has_call() {
        let request = TripRequest::new("北京", "2025-10-01", "2025-10-03").with_preferences(["历史", "美食"]);
        let calls = extract_tool_calls(&attraction_query(&request));
        assert_eq!(calls.len(), 1);
        let args = calls[0].arguments("query");
        assert_eq!(args["keywords"], "历史");
        assert_eq!(args["city"], "北京");

        let plain = TripRequest::new("上海", "2025-10-01", "2025-10-01");
        assert!(attraction_query(&plain).contains("keywords=景点"));
    }

    #[test]
    fn test_stage_outputs_embedded_verbatim() {
        let request = TripRequest::new("北京", "2025-10-01", "2025-10-03");
        let attractions = "A1 (39.9,116.4)\nA2 [rating 4.8]";
        assert!(lodging_query(&request, attractions).contains(attractions));
        assert!(weather_query(&request, "H1, H2").contains("H1, H2"));

        let synthesis = synthesis_query(&request, attractions, "HOTELS", "WEATHER");
        assert!(synthesis.contains(attractions));
        assert!(synthesis.contains("HOTELS"));
        assert!(synthesis.contains("WEATHER"));
        assert!(synthesis.contains("3 day(s)"));
        assert!(extract_tool_calls(&synthesis).is_empty());
    }
}
