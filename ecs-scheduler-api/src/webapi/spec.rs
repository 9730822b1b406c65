//! Documentation resource: the Swagger description of the web api.

use axum::Json;
use serde_json::{json, Value};

/// Return the swagger api specification.
pub async fn swagger_spec() -> Json<Value> {
    Json(spec_document())
}

fn spec_document() -> Value {
    json!({
        "swagger": "2.0",
        "info": {
            "title": "ECS Scheduler Web Api (webapi)",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "basePath": "/",
        "consumes": ["application/json"],
        "produces": ["application/json"],
        "paths": {
            "/": {
                "get": {
                    "tags": ["docs"],
                    "summary": "Available endpoints for the web api",
                    "responses": {
                        "200": {"description": "List of available endpoints"},
                    },
                },
            },
            "/spec": {
                "get": {
                    "tags": ["docs"],
                    "summary": "Return the swagger api specification",
                    "responses": {
                        "200": {"description": "API spec documentation"},
                    },
                },
            },
            "/jobs": {
                "get": {
                    "tags": ["jobs"],
                    "summary": "List of scheduled jobs",
                    "parameters": [
                        {
                            "name": "skip",
                            "in": "query",
                            "type": "integer",
                            "default": 0,
                            "description": "number of jobs to skip",
                        },
                        {
                            "name": "count",
                            "in": "query",
                            "type": "integer",
                            "default": 10,
                            "description": "number of jobs to return",
                        },
                    ],
                    "responses": {
                        "200": {"description": "Paginated list of scheduled jobs"},
                        "400": {"description": "Invalid pagination arguments"},
                        "default": {"description": "Server error"},
                    },
                },
                "post": {
                    "tags": ["jobs"],
                    "summary": "Create a new scheduled job",
                    "parameters": [
                        {
                            "name": "body",
                            "in": "body",
                            "schema": {"$ref": "#/definitions/Job"},
                        },
                    ],
                    "responses": {
                        "201": {"description": "Job created and scheduled"},
                        "400": {"description": "Invalid body"},
                        "409": {"description": "Job already exists"},
                        "415": {"description": "Invalid request media type"},
                        "default": {"description": "Server error"},
                    },
                },
            },
            "/jobs/{job_id}": {
                "parameters": [
                    {
                        "name": "job_id",
                        "in": "path",
                        "type": "string",
                        "required": true,
                        "description": "the job id",
                    },
                ],
                "get": {
                    "tags": ["jobs"],
                    "summary": "The job for the given id",
                    "responses": {
                        "200": {"description": "The job for job id"},
                        "404": {"description": "Job not found"},
                        "default": {"description": "Server error"},
                    },
                },
                "put": {
                    "tags": ["jobs"],
                    "summary": "Update the specified job",
                    "parameters": [
                        {
                            "name": "body",
                            "in": "body",
                            "schema": {"$ref": "#/definitions/JobUpdate"},
                        },
                    ],
                    "responses": {
                        "200": {"description": "Job updated and rescheduled"},
                        "400": {"description": "Invalid body"},
                        "404": {"description": "Job not found"},
                        "415": {"description": "Invalid request media type"},
                        "default": {"description": "Server error"},
                    },
                },
                "delete": {
                    "tags": ["jobs"],
                    "summary": "Delete and unschedule the specified job",
                    "responses": {
                        "200": {"description": "Job deleted"},
                        "404": {"description": "Job not found"},
                        "default": {"description": "Server error"},
                    },
                },
            },
        },
        "definitions": {
            "Job": {
                "required": ["taskDefinition", "schedule"],
                "properties": {
                    "taskDefinition": {
                        "type": "string",
                        "description": "Name of task definition in ECS, used as job id if no id is specified",
                    },
                    "id": {
                        "type": "string",
                        "description": "Job id; only necessary if multiple jobs share a task definition",
                    },
                    "schedule": {
                        "type": "string",
                        "description": "Cron-style description of the job's run schedule",
                    },
                    "taskCount": {
                        "type": "integer",
                        "default": 1,
                        "minimum": 1,
                        "maximum": 50,
                        "description": "Number of tasks to start when the job is run",
                    },
                    "maxCount": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 50,
                        "description": "Maximum number of tasks to run",
                    },
                    "scheduleStart": {
                        "type": "string",
                        "description": "Start date in ISO-8601 format from which to begin scheduling the job",
                    },
                    "scheduleEnd": {
                        "type": "string",
                        "description": "End date in ISO-8601 format at which to stop scheduling the job",
                    },
                    "timezone": {
                        "type": "string",
                        "description": "IANA timezone name for the schedule",
                    },
                    "suspended": {
                        "type": "boolean",
                        "default": false,
                        "description": "Tell the scheduler to suspend the job",
                    },
                    "trigger": {"$ref": "#/definitions/Trigger"},
                    "overrides": {
                        "type": "array",
                        "items": {"$ref": "#/definitions/Override"},
                    },
                },
            },
            "JobUpdate": {
                "properties": {
                    "taskDefinition": {"type": "string"},
                    "schedule": {"type": "string"},
                    "taskCount": {"type": "integer", "minimum": 1, "maximum": 50},
                    "maxCount": {"type": "integer", "minimum": 1, "maximum": 50},
                    "scheduleStart": {"type": "string"},
                    "scheduleEnd": {"type": "string"},
                    "timezone": {"type": "string"},
                    "suspended": {"type": "boolean"},
                    "trigger": {"$ref": "#/definitions/Trigger"},
                    "overrides": {
                        "type": "array",
                        "items": {"$ref": "#/definitions/Override"},
                    },
                },
            },
            "Trigger": {
                "required": ["type"],
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["noop", "sqs"],
                        "description": "Trigger type",
                    },
                    "queueName": {
                        "type": "string",
                        "description": "SQS queue name, required if type is 'sqs'",
                    },
                    "messagesPerTask": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Scaling factor for sqs triggers",
                    },
                },
            },
            "Override": {
                "required": ["containerName"],
                "properties": {
                    "containerName": {
                        "type": "string",
                        "description": "The container in the task definition to apply the overrides to",
                    },
                    "environment": {
                        "type": "object",
                        "description": "Environment variable overrides as \"NAME\": \"VALUE\" pairs",
                    },
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_document_describes_endpoints() {
        let spec = spec_document();
        assert_eq!(spec["swagger"], "2.0");
        assert_eq!(spec["basePath"], "/");
        for path in ["/", "/spec", "/jobs", "/jobs/{job_id}"] {
            assert!(spec["paths"].get(path).is_some(), "missing path {path}");
        }
        assert_eq!(
            spec["definitions"]["Job"]["required"],
            json!(["taskDefinition", "schedule"])
        );
    }
}
